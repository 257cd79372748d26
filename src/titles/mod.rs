//! Best-effort conversation titling.
//!
//! The announcer is a fire-and-forget background task with its own error
//! boundary: whatever the title service or the store do, nothing here can
//! reach the owning session's state machine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::protocol::{EventSink, ServerEvent};
use crate::store::{ConversationId, ConversationPatch, ConversationStore};

/// Title generation collaborator. Best-effort: returns `None` instead of
/// failing into the caller.
#[async_trait]
pub trait TitleService: Send + Sync {
    async fn generate_title(&self, user_text: &str, assistant_text: &str) -> Option<String>;
}

/// A title service that never produces a title.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTitleService;

#[async_trait]
impl TitleService for NullTitleService {
    async fn generate_title(&self, _user_text: &str, _assistant_text: &str) -> Option<String> {
        None
    }
}

/// Announce a title for a conversation's first completed exchange.
///
/// Runs detached from the session. If a title is produced it is pushed to
/// the channel and persisted; failures are logged and swallowed.
pub fn announce_title(
    titles: Arc<dyn TitleService>,
    store: Arc<dyn ConversationStore>,
    sink: EventSink,
    conversation_id: ConversationId,
    user_text: String,
    assistant_text: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(title) = titles.generate_title(&user_text, &assistant_text).await else {
            tracing::debug!(conversation_id = %conversation_id, "no title produced");
            return;
        };
        (sink)(ServerEvent::TitleUpdate {
            conversation_id,
            title: title.clone(),
        });
        let patch = ConversationPatch {
            title: Some(title),
            ..Default::default()
        };
        if let Err(err) = store.update_conversation(conversation_id, patch).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %err,
                "failed to persist generated title"
            );
        }
    })
}
