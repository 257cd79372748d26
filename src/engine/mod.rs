//! Boundary types and traits for the agent execution engine.
//!
//! The engine's dynamic event shapes are pinned down here as a closed
//! tagged union; the rest of the crate only ever sees [`ContentEvent`].

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One atomic item in the engine's output sequence for a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    /// A fragment of assistant text.
    Text { text: String },
    /// The engine started a tool invocation.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool finished. Late results may arrive without a name; the
    /// translator resolves it through its correlation map.
    ToolResult {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        output: serde_json::Value,
    },
    /// Result marker closing the sequence.
    Terminal {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Lazy, ordered, finite sequence of content events, terminated by a
/// [`ContentEvent::Terminal`] marker.
pub type ContentEventStream = BoxStream<'static, Result<ContentEvent>>;

/// Configuration handed to the engine when a session connects.
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    /// Fully assembled system prompt: base instructions plus any resolved
    /// context block.
    #[builder(into)]
    pub system_prompt: String,
    /// Tool names the engine may invoke.
    #[builder(default)]
    pub allowed_tools: Vec<String>,
    /// Integrations active for this session.
    #[builder(default)]
    pub integrations: Vec<String>,
    /// Initial model.
    #[builder(into)]
    pub model_id: String,
}

/// A connected engine-side session for one logical conversation.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Opaque resumption handle, when the engine provides one.
    fn session_token(&self) -> Option<String>;

    /// Switch the active model for subsequent prompts.
    async fn set_model(&mut self, model_id: &str) -> Result<()>;

    /// Submit a prompt and stream back the normalized content events.
    async fn submit_prompt(&mut self, text: &str) -> Result<ContentEventStream>;

    /// Tear down the engine-side session.
    async fn disconnect(&mut self) -> Result<()>;
}

/// The agent execution engine shared by all sessions.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn connect(&self, config: EngineConfig) -> Result<Box<dyn EngineSession>>;
}
