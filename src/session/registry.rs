//! Channel-to-session registry.
//!
//! One [`ConversationSession`] is bound to at most one open channel at a
//! time; a channel identifier is unique per open connection. The registry
//! owns the map explicitly — there is no ambient or static state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ParleyConfig;
use crate::error::{ParleyError, Result};
use crate::protocol::{ClientMessage, EventSink, ServerEvent};
use crate::session::conversation::{ConversationSession, SessionServices, StartOptions};
use crate::store::ConversationId;

/// What a client asks for when opening a channel.
#[derive(Debug, Clone, Default)]
pub struct OpenRequest {
    /// Resume this conversation instead of starting a fresh one.
    pub resume: Option<ConversationId>,
    /// Initial model for a fresh conversation.
    pub model_id: Option<String>,
    /// External context to link into a fresh conversation.
    pub linked_context_id: Option<String>,
}

/// Maps channel identifiers to live sessions and routes client frames.
pub struct SessionRegistry {
    services: SessionServices,
    config: ParleyConfig,
    channels: HashMap<String, Arc<ConversationSession>>,
}

impl SessionRegistry {
    pub fn new(services: SessionServices, config: ParleyConfig) -> Self {
        Self {
            services,
            config,
            channels: HashMap::new(),
        }
    }

    /// Open a channel: resume when requested, otherwise start fresh.
    ///
    /// A resumption failure is surfaced on the sink as an `error` event and
    /// the channel is not registered; it is never silently downgraded to a
    /// fresh session. On success the channel's first event is `init`.
    pub async fn open(
        &mut self,
        channel_id: impl Into<String>,
        request: OpenRequest,
        sink: EventSink,
    ) -> Result<Arc<ConversationSession>> {
        let channel_id = channel_id.into();
        if self.channels.contains_key(&channel_id) {
            return Err(ParleyError::InvalidState(format!(
                "channel {channel_id} is already open"
            )));
        }

        let opened = match request.resume {
            Some(conversation_id) => ConversationSession::resume(
                conversation_id,
                channel_id.clone(),
                self.services.clone(),
                &self.config,
                sink.clone(),
            )
            .await
            .map(|(session, history)| (session, true, Some(history))),
            None => ConversationSession::start(
                channel_id.clone(),
                StartOptions {
                    model_id: request.model_id,
                    linked_context_id: request.linked_context_id,
                },
                self.services.clone(),
                &self.config,
                sink.clone(),
            )
            .await
            .map(|session| (session, false, None)),
        };

        let (session, resumed, history) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!(channel_id = %channel_id, error = %err, "channel open failed");
                (sink)(ServerEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        (sink)(ServerEvent::Init {
            conversation_id: session.conversation_id(),
            resumed,
            history,
        });

        let session = Arc::new(session);
        self.channels.insert(channel_id, session.clone());
        Ok(session)
    }

    /// Route one client frame to the channel's session.
    ///
    /// `message` frames run as an independent task so that `cancel` frames
    /// can land while the exchange is streaming; a turn rejected for being
    /// out of state is surfaced on the channel as an `error` event.
    pub fn dispatch(&self, channel_id: &str, message: ClientMessage) -> Result<()> {
        let session = self
            .channels
            .get(channel_id)
            .ok_or_else(|| ParleyError::NotFound(format!("channel {channel_id}")))?
            .clone();

        match message {
            ClientMessage::Message { content, model } => {
                tokio::spawn(async move {
                    if let Err(err) = session.send_turn(content, model).await {
                        session.report_error(&err);
                    }
                });
            }
            ClientMessage::Cancel => {
                tokio::spawn(async move {
                    session.request_cancel().await;
                });
            }
        }
        Ok(())
    }

    /// Close a channel (normal or abnormal disconnect) and end its session.
    ///
    /// Returns the conversation id the channel was bound to, if any.
    pub async fn close(&mut self, channel_id: &str) -> Option<ConversationId> {
        let session = self.channels.remove(channel_id)?;
        session.end().await;
        Some(session.conversation_id())
    }

    pub fn get(&self, channel_id: &str) -> Option<&Arc<ConversationSession>> {
        self.channels.get(channel_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        self.channels.keys().map(|id| id.as_str()).collect()
    }
}
