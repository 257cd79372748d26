//! Conversation session: the unit of resumable state.
//!
//! Binds a conversation identity, an engine binding, a stream translator,
//! and per-exchange metrics behind one state machine. All public methods
//! take `&self`; interior mutability lets a registry hold the session in an
//! `Arc` while a streaming turn and a cancellation request land from
//! different tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};

use crate::config::ParleyConfig;
use crate::engine::ExecutionEngine;
use crate::error::{ParleyError, Result};
use crate::metrics::ExchangeMetrics;
use crate::protocol::{EventSink, ServerEvent};
use crate::session::binding::{AgentSessionBinding, CapabilityCatalog, ContextSource};
use crate::session::translator::{CancelFlag, ExchangeOutcome, ExchangeStatus, StreamTranslator};
use crate::store::{
    ConversationId, ConversationPatch, ConversationStore, TaskId, TurnId, TurnMeta, TurnOutcome,
    TurnRecord, TurnRole,
};
use crate::titles::{announce_title, TitleService};

/// Session lifecycle state. Owned exclusively by the session; `Terminated`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange in flight; ready to accept a turn.
    Idle,
    /// A turn is streaming.
    Streaming,
    /// Cancellation requested; waiting for the stream to stop at the next
    /// content-unit boundary.
    CancelRequested,
    /// The channel closed; no further transitions.
    Terminated,
}

/// Identity of one bound conversation. Immutable for the session lifetime.
#[derive(Debug, Clone)]
pub struct ConversationIdentity {
    pub conversation_id: ConversationId,
    pub channel_id: String,
    /// Opaque resumption handle from the execution engine, if issued.
    pub session_token: Option<String>,
    pub linked_context_id: Option<String>,
}

/// Collaborators shared by every session a registry creates.
#[derive(Clone)]
pub struct SessionServices {
    pub engine: Arc<dyn ExecutionEngine>,
    pub store: Arc<dyn ConversationStore>,
    pub titles: Arc<dyn TitleService>,
    pub capabilities: Arc<dyn CapabilityCatalog>,
    pub contexts: Arc<dyn ContextSource>,
}

/// Options for starting a fresh conversation.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Initial model; falls back to the configured default.
    pub model_id: Option<String>,
    /// External context to resolve into the system prompt.
    pub linked_context_id: Option<String>,
}

/// The unit of resumable conversational state.
pub struct ConversationSession {
    identity: ConversationIdentity,
    services: SessionServices,
    sink: EventSink,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    binding: Mutex<AgentSessionBinding>,
    cancel: CancelFlag,
    title_requested: AtomicBool,
    message_count: AtomicU64,
    idle_notify: Notify,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    /// Start a fresh conversation bound to `channel_id`.
    ///
    /// The linked context is resolved once before the binding connects, and
    /// the capability set is fetched fresh; neither is cached across
    /// sessions. Registers the conversation with the store.
    pub async fn start(
        channel_id: impl Into<String>,
        options: StartOptions,
        services: SessionServices,
        config: &ParleyConfig,
        sink: EventSink,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        let model_id = options
            .model_id
            .clone()
            .unwrap_or_else(|| config.default_model.clone());

        let context_block = match &options.linked_context_id {
            Some(id) => services.contexts.resolve(id).await?,
            None => None,
        };
        let capabilities = services.capabilities.active_capabilities().await?;

        let binding = AgentSessionBinding::connect(
            services.engine.as_ref(),
            config,
            &model_id,
            context_block.as_deref(),
            capabilities,
        )
        .await?;

        let record = services.store.create_conversation().await?;
        services
            .store
            .update_conversation(
                record.id,
                ConversationPatch {
                    active: Some(true),
                    last_model: Some(model_id),
                    linked_context_id: options.linked_context_id.clone(),
                    ..Default::default()
                },
            )
            .await?;

        let identity = ConversationIdentity {
            conversation_id: record.id,
            channel_id,
            session_token: binding.session_token(),
            linked_context_id: options.linked_context_id,
        };
        tracing::debug!(conversation_id = %identity.conversation_id, "conversation started");
        Ok(Self::assemble(identity, binding, services, sink, false, 0))
    }

    /// Resume a stored conversation onto `channel_id`.
    ///
    /// Fails with [`ParleyError::NotFound`] for unknown ids. Recent history
    /// is replayed into the engine as a priming prompt whose response is
    /// discarded; the returned turns are for the caller's `init` event, and
    /// nothing is emitted on the sink here.
    pub async fn resume(
        conversation_id: ConversationId,
        channel_id: impl Into<String>,
        services: SessionServices,
        config: &ParleyConfig,
        sink: EventSink,
    ) -> Result<(Self, Vec<TurnRecord>)> {
        let record = services
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound(format!("conversation {conversation_id}")))?;

        let context_block = match &record.linked_context_id {
            Some(id) => services.contexts.resolve(id).await?,
            None => None,
        };
        let capabilities = services.capabilities.active_capabilities().await?;
        let model_id = record
            .last_model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());

        let mut binding = AgentSessionBinding::connect(
            services.engine.as_ref(),
            config,
            &model_id,
            context_block.as_deref(),
            capabilities,
        )
        .await?;

        let history = services
            .store
            .list_recent_turns(conversation_id, config.replay_limit)
            .await?;
        binding.prime(&history).await?;

        services
            .store
            .update_conversation(
                conversation_id,
                ConversationPatch {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let identity = ConversationIdentity {
            conversation_id,
            channel_id: channel_id.into(),
            session_token: binding.session_token(),
            linked_context_id: record.linked_context_id.clone(),
        };
        tracing::debug!(
            conversation_id = %conversation_id,
            replayed = history.len(),
            "conversation resumed"
        );
        let session = Self::assemble(
            identity,
            binding,
            services,
            sink,
            record.title.is_some(),
            record.message_count,
        );
        Ok((session, history))
    }

    fn assemble(
        identity: ConversationIdentity,
        binding: AgentSessionBinding,
        services: SessionServices,
        sink: EventSink,
        has_title: bool,
        message_count: u64,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        Self {
            identity,
            services,
            sink,
            state: Mutex::new(SessionState::Idle),
            state_tx,
            state_rx,
            binding: Mutex::new(binding),
            cancel: CancelFlag::new(),
            title_requested: AtomicBool::new(has_title),
            message_count: AtomicU64::new(message_count),
            idle_notify: Notify::new(),
        }
    }

    pub fn identity(&self) -> &ConversationIdentity {
        &self.identity
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.identity.conversation_id
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until no exchange is in flight.
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            let state = *self.state.lock().await;
            if matches!(state, SessionState::Idle | SessionState::Terminated) {
                return;
            }
            notified.await;
        }
    }

    /// Submit one user turn and stream the exchange to the channel sink.
    ///
    /// Returns after the terminal event (`stream_end`, `cancelled`, or
    /// `error`) has been emitted; the session is back in `Idle` whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// [`ParleyError::InvalidState`] if the session is not idle. Engine and
    /// persistence failures do not surface here; they terminate the
    /// exchange with an `error` event instead.
    pub async fn send_turn(
        &self,
        text: impl Into<String>,
        requested_model: Option<String>,
    ) -> Result<ExchangeStatus> {
        self.transition_to_streaming()?;
        let text = text.into();

        let status = self.run_exchange(&text, requested_model).await;

        self.return_to_idle().await;
        Ok(status)
    }

    /// Request cooperative cancellation of the in-flight exchange.
    ///
    /// Idempotent; a no-op unless the session is streaming. The flag is
    /// polled at content-unit boundaries, so at most one more in-flight
    /// unit may still be delivered.
    pub async fn request_cancel(&self) {
        let mut state = self.state.lock().await;
        if *state != SessionState::Streaming {
            return;
        }
        *state = SessionState::CancelRequested;
        let _ = self.state_tx.send(SessionState::CancelRequested);
        self.cancel.set();
        tracing::debug!(conversation_id = %self.identity.conversation_id, "cancel requested");
    }

    /// Terminate the session: disconnect the engine binding and mark the
    /// conversation inactive. Idempotent; data is detached, never deleted.
    pub async fn end(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
            let _ = self.state_tx.send(SessionState::Terminated);
        }
        // Stop any in-flight relay at its next unit boundary before taking
        // the binding lock.
        self.cancel.set();

        let mut binding = self.binding.lock().await;
        if let Err(err) = binding.disconnect().await {
            tracing::warn!(
                conversation_id = %self.identity.conversation_id,
                error = %err,
                "engine disconnect failed"
            );
        }
        drop(binding);

        if let Err(err) = self
            .services
            .store
            .update_conversation(
                self.identity.conversation_id,
                ConversationPatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(
                conversation_id = %self.identity.conversation_id,
                error = %err,
                "failed to mark conversation inactive"
            );
        }
        self.idle_notify.notify_waiters();
        tracing::debug!(conversation_id = %self.identity.conversation_id, "session ended");
    }

    /// Surface an error on the channel without touching session state.
    pub fn report_error(&self, err: &ParleyError) {
        (self.sink)(ServerEvent::Error {
            message: err.to_string(),
        });
    }

    // -- Internal helpers --

    /// Atomically transition from `Idle` to `Streaming`.
    fn transition_to_streaming(&self) -> Result<()> {
        // `try_lock` fails fast without holding the mutex across an await;
        // contention means another task is already mutating state.
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| ParleyError::InvalidState("session is busy".into()))?;
        if *state != SessionState::Idle {
            return Err(ParleyError::InvalidState(format!(
                "cannot submit a turn while {:?}",
                *state
            )));
        }
        *state = SessionState::Streaming;
        let _ = self.state_tx.send(SessionState::Streaming);
        // Cleared under the state lock so a cancel raced against the
        // transition is either a pre-turn no-op or a real cancel of this turn.
        self.cancel.clear();
        Ok(())
    }

    async fn return_to_idle(&self) {
        let mut state = self.state.lock().await;
        // `end` may have terminated the session while the exchange wound down.
        if *state == SessionState::Terminated {
            return;
        }
        *state = SessionState::Idle;
        let _ = self.state_tx.send(SessionState::Idle);
        drop(state);
        self.idle_notify.notify_waiters();
    }

    /// Run one exchange to its terminal event. Never errors: engine and
    /// persistence failures become a `Failed` outcome with an `error` event.
    async fn run_exchange(&self, text: &str, requested_model: Option<String>) -> ExchangeStatus {
        let conversation_id = self.identity.conversation_id;
        let mut metrics = ExchangeMetrics::begin();
        let mut binding = self.binding.lock().await;

        // The user turn is durable before any streamed event goes out.
        if let Err(err) = self
            .services
            .store
            .create_turn(conversation_id, TurnRole::User, text, TurnMeta::default())
            .await
        {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %err,
                "failed to persist user turn"
            );
            self.report_error(&err);
            return ExchangeStatus::Failed;
        }

        let streamed = self
            .stream_response(&mut binding, text, requested_model, &mut metrics)
            .await;
        let outcome = match streamed {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "exchange failed before streaming"
                );
                ExchangeOutcome::failed(err.to_string())
            }
        };
        let model_id = binding.model_id().to_string();
        drop(binding);

        self.finish_exchange(text, model_id, outcome, metrics).await
    }

    /// Model switch, `stream_start`, prompt submission, and relay.
    async fn stream_response(
        &self,
        binding: &mut AgentSessionBinding,
        text: &str,
        requested_model: Option<String>,
        metrics: &mut ExchangeMetrics,
    ) -> Result<ExchangeOutcome> {
        if let Some(requested) = requested_model {
            let current = binding.model_id().to_string();
            if requested != current {
                binding.set_model(&requested).await?;
                (self.sink)(ServerEvent::ModelSwitch {
                    from: current,
                    to: requested,
                });
            }
        }

        (self.sink)(ServerEvent::StreamStart {
            model: binding.model_id().to_string(),
        });

        let stream = binding.submit_prompt(text).await?;
        let mut translator = StreamTranslator::new(self.cancel.clone());
        Ok(translator.relay(stream, &self.sink, metrics).await)
    }

    /// Persist the assistant turn and exchange report, update conversation
    /// aggregates, and emit the terminal event.
    async fn finish_exchange(
        &self,
        user_text: &str,
        model_id: String,
        outcome: ExchangeOutcome,
        metrics: ExchangeMetrics,
    ) -> ExchangeStatus {
        let conversation_id = self.identity.conversation_id;
        let success = outcome.status == ExchangeStatus::Completed;
        let turn_outcome = match outcome.status {
            ExchangeStatus::Completed => TurnOutcome::Completed,
            ExchangeStatus::Cancelled => TurnOutcome::Cancelled,
            ExchangeStatus::Failed => TurnOutcome::Failed,
        };
        let meta = TurnMeta {
            model_id: Some(model_id.clone()),
            tool_calls: outcome.tool_calls.clone(),
            outcome: turn_outcome,
        };
        let report = metrics.finalize(success);

        let persisted: Result<(TurnId, TaskId)> = async {
            let message_id = self
                .services
                .store
                .create_turn(conversation_id, TurnRole::Assistant, &outcome.text, meta)
                .await?;
            let task_id = self
                .services
                .store
                .create_task(conversation_id, report)
                .await?;
            let message_count = self.message_count.fetch_add(2, Ordering::SeqCst) + 2;
            self.services
                .store
                .update_conversation(
                    conversation_id,
                    ConversationPatch {
                        message_count: Some(message_count),
                        last_model: Some(model_id),
                        ..Default::default()
                    },
                )
                .await?;
            Ok((message_id, task_id))
        }
        .await;

        match outcome.status {
            ExchangeStatus::Completed => match persisted {
                Ok((message_id, task_id)) => {
                    (self.sink)(ServerEvent::StreamEnd {
                        task_id,
                        message_id,
                    });
                    self.maybe_announce_title(user_text, &outcome.text);
                    ExchangeStatus::Completed
                }
                Err(err) => {
                    // The delivered stream stands; the persistence failure
                    // becomes the terminal event.
                    tracing::error!(
                        conversation_id = %conversation_id,
                        error = %err,
                        "failed to persist completed exchange"
                    );
                    self.report_error(&err);
                    ExchangeStatus::Failed
                }
            },
            ExchangeStatus::Cancelled => {
                // The translator already emitted the `cancelled` terminal.
                if let Err(err) = persisted {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        error = %err,
                        "failed to persist cancelled exchange"
                    );
                    self.report_error(&err);
                }
                ExchangeStatus::Cancelled
            }
            ExchangeStatus::Failed => {
                if let Err(err) = persisted {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        error = %err,
                        "failed to persist failed exchange"
                    );
                }
                (self.sink)(ServerEvent::Error {
                    message: outcome
                        .error
                        .unwrap_or_else(|| "exchange failed".to_string()),
                });
                ExchangeStatus::Failed
            }
        }
    }

    /// Schedule the title announcement once, after the first completed
    /// exchange of an untitled conversation.
    fn maybe_announce_title(&self, user_text: &str, assistant_text: &str) {
        if self.title_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = announce_title(
            self.services.titles.clone(),
            self.services.store.clone(),
            self.sink.clone(),
            self.identity.conversation_id,
            user_text.to_string(),
            assistant_text.to_string(),
        );
    }
}
