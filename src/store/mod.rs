//! Persistence boundary: conversations, turns, and task records.
//!
//! The store is an external, idempotent-on-retry collaborator with no
//! transactional coupling to the streaming path. Sessions only detach
//! conversations (`active = false`); nothing here deletes data.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::ExchangeReport;

pub type ConversationId = Uuid;
pub type TurnId = Uuid;
pub type TaskId = Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// How the exchange that produced a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    #[default]
    Completed,
    Cancelled,
    Failed,
}

/// Tool-call execution state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Error,
}

/// One recorded tool invocation within a turn. `call_id` is the sole
/// correlation key between an invocation and its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub status: ToolCallStatus,
}

/// One user message or assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub turn_id: TurnId,
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub outcome: TurnOutcome,
    pub created_at: DateTime<Utc>,
}

/// Metadata attached when persisting a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnMeta {
    pub model_id: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub outcome: TurnOutcome,
}

/// A stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: Option<String>,
    pub active: bool,
    pub message_count: u64,
    pub last_model: Option<String>,
    pub linked_context_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a conversation record; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub active: Option<bool>,
    pub message_count: Option<u64>,
    pub last_model: Option<String>,
    pub linked_context_id: Option<String>,
}

/// Conversation, turn, and task persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self) -> Result<ConversationRecord>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRecord>>;

    async fn update_conversation(&self, id: ConversationId, patch: ConversationPatch)
        -> Result<()>;

    async fn create_turn(
        &self,
        conversation_id: ConversationId,
        role: TurnRole,
        content: &str,
        meta: TurnMeta,
    ) -> Result<TurnId>;

    /// The most recent `limit` turns, oldest first.
    async fn list_recent_turns(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>>;

    /// Persist a finalized exchange report for later analysis.
    async fn create_task(
        &self,
        conversation_id: ConversationId,
        report: ExchangeReport,
    ) -> Result<TaskId>;
}
