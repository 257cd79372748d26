//! Wire protocol between the session core and connected clients.
//!
//! The channel is assumed to deliver discrete, ordered, typed messages in
//! both directions; framing is the transport's problem. Tag names here are
//! load-bearing: clients dispatch on the `type` field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{ConversationId, TaskId, TurnId, TurnRecord};

/// Messages a client may send on an open channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit one user turn, optionally switching models first.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Request cooperative cancellation of the in-flight turn.
    Cancel,
}

/// A tool invocation as exposed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUsePayload {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A tool result as exposed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultPayload {
    pub id: String,
    pub name: String,
    pub output: serde_json::Value,
}

/// Events the server pushes to a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First event on every successfully opened channel.
    Init {
        conversation_id: ConversationId,
        resumed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        history: Option<Vec<TurnRecord>>,
    },
    /// Emitted before `stream_start` when a turn switches models.
    ModelSwitch { from: String, to: String },
    StreamStart { model: String },
    TextDelta { content: String },
    ToolUse { tool: ToolUsePayload },
    ToolResult { tool: ToolResultPayload },
    /// Terminal event for a cancelled exchange.
    Cancelled,
    TitleUpdate {
        conversation_id: ConversationId,
        title: String,
    },
    /// Terminal event for a completed exchange; ids reference the persisted
    /// task record and assistant turn.
    StreamEnd { task_id: TaskId, message_id: TurnId },
    /// Terminal event for a failed exchange, or a secondary report of a
    /// persistence failure after delivery.
    Error { message: String },
}

impl ServerEvent {
    /// The wire tag, handy for ordering assertions and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::ModelSwitch { .. } => "model_switch",
            Self::StreamStart { .. } => "stream_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Cancelled => "cancelled",
            Self::TitleUpdate { .. } => "title_update",
            Self::StreamEnd { .. } => "stream_end",
            Self::Error { .. } => "error",
        }
    }
}

/// Callback sink delivering server events to one channel.
pub type EventSink = Arc<dyn Fn(ServerEvent) + Send + Sync>;
