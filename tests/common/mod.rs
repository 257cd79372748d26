//! Shared scripted collaborators for the integration suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;

use parley::engine::{
    ContentEvent, ContentEventStream, EngineConfig, EngineSession, ExecutionEngine,
};
use parley::error::{ParleyError, Result};
use parley::protocol::{EventSink, ServerEvent};
use parley::session::{CapabilityCatalog, CapabilitySet, ContextSource, SessionServices};
use parley::store::{
    ConversationId, ConversationPatch, ConversationRecord, ConversationStore, MemoryStore, TaskId,
    TurnId, TurnMeta, TurnRecord, TurnRole,
};
use parley::metrics::ExchangeReport;
use parley::titles::TitleService;

// -- Scripted engine --

/// One step of a scripted engine response.
pub enum ScriptStep {
    Emit(ContentEvent),
    /// Yield an engine error and end the stream.
    Fail(String),
    /// Park the stream until the notify fires.
    Gate(Arc<Notify>),
}

#[derive(Default)]
pub struct EngineState {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    prompts: Mutex<Vec<String>>,
    models_set: Mutex<Vec<String>>,
    configs: Mutex<Vec<EngineConfig>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Engine that pops one queued script per submitted prompt. Prompts with no
/// queued script complete immediately with empty output.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<EngineState>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        self.state.scripts.lock().unwrap().push_back(steps);
    }

    /// Queue an empty successful response (e.g. for a priming replay).
    pub fn push_empty_script(&self) {
        self.push_script(vec![ScriptStep::Emit(terminal_ok())]);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn models_set(&self) -> Vec<String> {
        self.state.models_set.lock().unwrap().clone()
    }

    pub fn configs(&self) -> Vec<EngineConfig> {
        self.state.configs.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    state: Arc<EngineState>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    fn session_token(&self) -> Option<String> {
        Some("scripted-token".to_string())
    }

    async fn set_model(&mut self, model_id: &str) -> Result<()> {
        self.state
            .models_set
            .lock()
            .unwrap()
            .push(model_id.to_string());
        Ok(())
    }

    async fn submit_prompt(&mut self, text: &str) -> Result<ContentEventStream> {
        self.state.prompts.lock().unwrap().push(text.to_string());
        let steps = self
            .state
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ScriptStep::Emit(terminal_ok())]);
        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Emit(event) => yield Ok(event),
                    ScriptStep::Fail(message) => {
                        yield Err(ParleyError::engine(message));
                        return;
                    }
                    ScriptStep::Gate(gate) => gate.notified().await,
                }
            }
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn connect(&self, config: EngineConfig) -> Result<Box<dyn EngineSession>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.configs.lock().unwrap().push(config);
        Ok(Box::new(ScriptedSession {
            state: self.state.clone(),
        }))
    }
}

// -- Content event shorthands --

pub fn text(fragment: &str) -> ScriptStep {
    ScriptStep::Emit(ContentEvent::Text {
        text: fragment.to_string(),
    })
}

pub fn tool_use(id: &str, name: &str, input: serde_json::Value) -> ScriptStep {
    ScriptStep::Emit(ContentEvent::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    })
}

pub fn tool_result(id: &str, name: Option<&str>, output: serde_json::Value) -> ScriptStep {
    ScriptStep::Emit(ContentEvent::ToolResult {
        id: id.to_string(),
        name: name.map(str::to_string),
        output,
    })
}

pub fn terminal_ok() -> ContentEvent {
    ContentEvent::Terminal {
        success: true,
        error: None,
    }
}

pub fn terminal_failed(error: &str) -> ContentEvent {
    ContentEvent::Terminal {
        success: false,
        error: Some(error.to_string()),
    }
}

// -- Recording sink --

/// Event sink that records everything pushed to the channel.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ServerEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        let events = self.events.clone();
        Arc::new(move |event| events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ServerEvent::kind).collect()
    }

    /// Poll until an event with the given wire tag shows up.
    pub async fn wait_for_kind(&self, kind: &str) {
        for _ in 0..500 {
            if self.kinds().iter().any(|k| *k == kind) {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for '{kind}' event; saw {:?}",
            self.kinds()
        );
    }
}

// -- Title service fakes --

/// Title service returning a fixed answer and counting invocations.
#[derive(Clone, Default)]
pub struct StaticTitles {
    title: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StaticTitles {
    pub fn with(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            calls: Arc::default(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleService for StaticTitles {
    async fn generate_title(&self, _user_text: &str, _assistant_text: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.title.clone()
    }
}

// -- Capability and context fakes --

#[derive(Clone, Default)]
pub struct StaticCapabilities(pub CapabilitySet);

#[async_trait]
impl CapabilityCatalog for StaticCapabilities {
    async fn active_capabilities(&self) -> Result<CapabilitySet> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Default)]
pub struct StaticContext {
    pub blocks: HashMap<String, String>,
}

#[async_trait]
impl ContextSource for StaticContext {
    async fn resolve(&self, context_id: &str) -> Result<Option<String>> {
        Ok(self.blocks.get(context_id).cloned())
    }
}

// -- Failing store wrapper --

/// Store wrapper that can be told to reject specific writes.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_user_turns: AtomicBool,
    pub fail_assistant_turns: AtomicBool,
    pub fail_tasks: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for FailingStore {
    async fn create_conversation(&self) -> Result<ConversationRecord> {
        self.inner.create_conversation().await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRecord>> {
        self.inner.get_conversation(id).await
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        patch: ConversationPatch,
    ) -> Result<()> {
        self.inner.update_conversation(id, patch).await
    }

    async fn create_turn(
        &self,
        conversation_id: ConversationId,
        role: TurnRole,
        content: &str,
        meta: TurnMeta,
    ) -> Result<TurnId> {
        let fail = match role {
            TurnRole::User => self.fail_user_turns.load(Ordering::SeqCst),
            TurnRole::Assistant => self.fail_assistant_turns.load(Ordering::SeqCst),
        };
        if fail {
            return Err(ParleyError::persistence("create_turn", "store rejected write"));
        }
        self.inner
            .create_turn(conversation_id, role, content, meta)
            .await
    }

    async fn list_recent_turns(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>> {
        self.inner.list_recent_turns(conversation_id, limit).await
    }

    async fn create_task(
        &self,
        conversation_id: ConversationId,
        report: ExchangeReport,
    ) -> Result<TaskId> {
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(ParleyError::persistence("create_task", "store rejected write"));
        }
        self.inner.create_task(conversation_id, report).await
    }
}

// -- Harness --

/// Everything a session or registry test needs, wired to scripted fakes.
pub struct Harness {
    pub engine: ScriptedEngine,
    pub store: Arc<MemoryStore>,
    pub titles: StaticTitles,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            engine: ScriptedEngine::new(),
            store: Arc::new(MemoryStore::new()),
            titles: StaticTitles::none(),
            sink: RecordingSink::new(),
        }
    }

    pub fn with_titles(title: &str) -> Self {
        Self {
            titles: StaticTitles::with(title),
            ..Self::new()
        }
    }

    pub fn services(&self) -> SessionServices {
        SessionServices {
            engine: Arc::new(self.engine.clone()),
            store: self.store.clone(),
            titles: Arc::new(self.titles.clone()),
            capabilities: Arc::new(StaticCapabilities::default()),
            contexts: Arc::new(StaticContext::default()),
        }
    }

    /// Services with a store other than the harness `MemoryStore`.
    pub fn services_with_store(&self, store: Arc<dyn ConversationStore>) -> SessionServices {
        SessionServices {
            engine: Arc::new(self.engine.clone()),
            store,
            titles: Arc::new(self.titles.clone()),
            capabilities: Arc::new(StaticCapabilities::default()),
            contexts: Arc::new(StaticContext::default()),
        }
    }
}
