//! One engine connection per logical conversation.

use async_trait::async_trait;
use futures::StreamExt;

use crate::config::ParleyConfig;
use crate::engine::{ContentEventStream, EngineConfig, EngineSession, ExecutionEngine};
use crate::error::Result;
use crate::store::{TurnRecord, TurnRole};

/// Active tool and integration capabilities. Fetched fresh for every
/// session start; never cached across sessions.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    pub tools: Vec<String>,
    pub integrations: Vec<String>,
}

/// Source of the currently active capability set.
#[async_trait]
pub trait CapabilityCatalog: Send + Sync {
    async fn active_capabilities(&self) -> Result<CapabilitySet>;
}

/// Resolves a linked external context into a prompt block.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn resolve(&self, context_id: &str) -> Result<Option<String>>;
}

/// Owns the engine-side session for one conversation: assembles the
/// engine configuration, submits prompts, switches models, and replays
/// history on resumption.
pub struct AgentSessionBinding {
    session: Box<dyn EngineSession>,
    model_id: String,
}

impl AgentSessionBinding {
    /// Connect to the engine with a freshly assembled configuration.
    pub async fn connect(
        engine: &dyn ExecutionEngine,
        config: &ParleyConfig,
        model_id: &str,
        context_block: Option<&str>,
        capabilities: CapabilitySet,
    ) -> Result<Self> {
        let engine_config = build_engine_config(config, model_id, context_block, capabilities);
        let session = engine.connect(engine_config).await?;
        Ok(Self {
            session,
            model_id: model_id.to_string(),
        })
    }

    /// The model currently active on the engine side.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The engine's resumption handle, if it issued one.
    pub fn session_token(&self) -> Option<String> {
        self.session.session_token()
    }

    pub async fn set_model(&mut self, model_id: &str) -> Result<()> {
        self.session.set_model(model_id).await?;
        self.model_id = model_id.to_string();
        Ok(())
    }

    pub async fn submit_prompt(&mut self, text: &str) -> Result<ContentEventStream> {
        self.session.submit_prompt(text).await
    }

    /// Replay prior turns into the engine as one synthetic prompt.
    ///
    /// The response stream is drained to its terminal marker and discarded;
    /// priming re-establishes engine-side context without emitting anything
    /// to the client.
    pub async fn prime(&mut self, turns: &[TurnRecord]) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }
        let prompt = priming_prompt(turns);
        let mut stream = self.session.submit_prompt(&prompt).await?;
        while let Some(event) = stream.next().await {
            let _ = event?;
        }
        tracing::debug!(replayed = turns.len(), "priming replay drained");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect().await
    }
}

fn build_engine_config(
    config: &ParleyConfig,
    model_id: &str,
    context_block: Option<&str>,
    capabilities: CapabilitySet,
) -> EngineConfig {
    let mut system_prompt = config.base_instructions.clone();
    if let Some(block) = context_block {
        if !system_prompt.is_empty() {
            system_prompt.push_str("\n\n");
        }
        system_prompt.push_str(block);
    }
    EngineConfig::builder()
        .system_prompt(system_prompt)
        .allowed_tools(capabilities.tools)
        .integrations(capabilities.integrations)
        .model_id(model_id)
        .build()
}

fn priming_prompt(turns: &[TurnRecord]) -> String {
    let mut prompt = String::from(
        "Context replay of the prior conversation. Do not respond to this \
         replay; acknowledge silently and wait for the next message.\n",
    );
    for turn in turns {
        let speaker = match turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        };
        prompt.push('\n');
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(&turn.content);
    }
    prompt
}
