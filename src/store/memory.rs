//! In-memory reference implementation of [`ConversationStore`].
//!
//! Backs the test suites and small embedders; everything lives in a
//! process-local map behind one lock, never held across an await.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ParleyError, Result};
use crate::metrics::ExchangeReport;

use super::{
    ConversationId, ConversationPatch, ConversationRecord, ConversationStore, TaskId, TurnId,
    TurnMeta, TurnRecord, TurnRole,
};

#[derive(Default)]
struct MemoryInner {
    conversations: HashMap<ConversationId, ConversationRecord>,
    turns: HashMap<ConversationId, Vec<TurnRecord>>,
    tasks: Vec<(TaskId, ConversationId, ExchangeReport)>,
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns of a conversation, oldest first.
    pub fn turns(&self, conversation_id: ConversationId) -> Vec<TurnRecord> {
        self.inner
            .read()
            .unwrap()
            .turns
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All persisted exchange reports for a conversation.
    pub fn tasks(&self, conversation_id: ConversationId) -> Vec<ExchangeReport> {
        self.inner
            .read()
            .unwrap()
            .tasks
            .iter()
            .filter(|(_, id, _)| *id == conversation_id)
            .map(|(_, _, report)| report.clone())
            .collect()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self) -> Result<ConversationRecord> {
        let record = ConversationRecord {
            id: Uuid::new_v4(),
            title: None,
            active: true,
            message_count: 0,
            last_model: None,
            linked_context_id: None,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .unwrap()
            .conversations
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRecord>> {
        Ok(self.inner.read().unwrap().conversations.get(&id).cloned())
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        patch: ConversationPatch,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .conversations
            .get_mut(&id)
            .ok_or_else(|| ParleyError::NotFound(format!("conversation {id}")))?;
        if let Some(title) = patch.title {
            record.title = Some(title);
        }
        if let Some(active) = patch.active {
            record.active = active;
        }
        if let Some(message_count) = patch.message_count {
            record.message_count = message_count;
        }
        if let Some(last_model) = patch.last_model {
            record.last_model = Some(last_model);
        }
        if let Some(linked_context_id) = patch.linked_context_id {
            record.linked_context_id = Some(linked_context_id);
        }
        Ok(())
    }

    async fn create_turn(
        &self,
        conversation_id: ConversationId,
        role: TurnRole,
        content: &str,
        meta: TurnMeta,
    ) -> Result<TurnId> {
        let mut inner = self.inner.write().unwrap();
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(ParleyError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }
        let record = TurnRecord {
            turn_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            model_id: meta.model_id,
            tool_calls: meta.tool_calls,
            outcome: meta.outcome,
            created_at: Utc::now(),
        };
        let turn_id = record.turn_id;
        inner.turns.entry(conversation_id).or_default().push(record);
        Ok(turn_id)
    }

    async fn list_recent_turns(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>> {
        let inner = self.inner.read().unwrap();
        let turns = inner
            .turns
            .get(&conversation_id)
            .map(|turns| turns.as_slice())
            .unwrap_or_default();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }

    async fn create_task(
        &self,
        conversation_id: ConversationId,
        report: ExchangeReport,
    ) -> Result<TaskId> {
        let task_id = Uuid::new_v4();
        self.inner
            .write()
            .unwrap()
            .tasks
            .push((task_id, conversation_id, report));
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ExchangeMetrics;
    use crate::store::TurnOutcome;

    #[tokio::test]
    async fn create_and_get_conversation() {
        let store = MemoryStore::new();
        let record = store.create_conversation().await.unwrap();
        let fetched = store.get_conversation(record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(fetched.active);
        assert_eq!(fetched.message_count, 0);
    }

    #[tokio::test]
    async fn get_missing_conversation_is_none() {
        let store = MemoryStore::new();
        assert!(store
            .get_conversation(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn patch_updates_only_set_fields() {
        let store = MemoryStore::new();
        let record = store.create_conversation().await.unwrap();
        store
            .update_conversation(
                record.id,
                ConversationPatch {
                    title: Some("Trip planning".into()),
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let fetched = store.get_conversation(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Trip planning"));
        assert!(!fetched.active);
        assert_eq!(fetched.message_count, 0);
    }

    #[tokio::test]
    async fn update_missing_conversation_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_conversation(Uuid::new_v4(), ConversationPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound(_)));
    }

    #[tokio::test]
    async fn turns_persist_in_order() {
        let store = MemoryStore::new();
        let record = store.create_conversation().await.unwrap();
        for i in 0..5 {
            store
                .create_turn(
                    record.id,
                    if i % 2 == 0 {
                        TurnRole::User
                    } else {
                        TurnRole::Assistant
                    },
                    &format!("turn {i}"),
                    TurnMeta::default(),
                )
                .await
                .unwrap();
        }

        let recent = store.list_recent_turns(record.id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "turn 2");
        assert_eq!(recent[2].content, "turn 4");
        assert_eq!(recent[2].outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn create_turn_requires_conversation() {
        let store = MemoryStore::new();
        let err = store
            .create_turn(Uuid::new_v4(), TurnRole::User, "hi", TurnMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound(_)));
    }

    #[tokio::test]
    async fn tasks_are_recorded_per_conversation() {
        let store = MemoryStore::new();
        let record = store.create_conversation().await.unwrap();
        let report = ExchangeMetrics::begin().finalize(true);
        store.create_task(record.id, report).await.unwrap();
        assert_eq!(store.tasks(record.id).len(), 1);
        assert!(store.tasks(Uuid::new_v4()).is_empty());
    }
}
