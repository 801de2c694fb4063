//! In-memory checkpoint store for tests and single-process use.

use async_trait::async_trait;
use ensemble_contract::{
    AgentState, CheckpointStore, CheckpointStoreError, CheckpointTuple, Committed, Version,
    VersionPrecondition,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct MemoryEntry {
    state: AgentState,
    version: Version,
    parent_version: Option<Version>,
}

/// Process-local checkpoint store backed by a `RwLock`ed map.
///
/// The write lock spans each `put_tuple`, which gives the at-most-one
/// writer guarantee per thread id.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_tuple(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(thread_id).map(|e| CheckpointTuple {
            state: e.state.clone(),
            version: e.version,
            parent_version: e.parent_version,
        }))
    }

    async fn put_tuple(
        &self,
        thread_id: &str,
        state: &AgentState,
        precondition: VersionPrecondition,
    ) -> Result<Committed, CheckpointStoreError> {
        let mut entries = self.entries.write().await;
        let current = entries.get(thread_id).map(|e| e.version);

        match (precondition, current) {
            (VersionPrecondition::Exact(expected), Some(actual)) if expected != actual => {
                return Err(CheckpointStoreError::VersionConflict { expected, actual });
            }
            (VersionPrecondition::Exact(expected), None) => {
                return Err(CheckpointStoreError::VersionConflict {
                    expected,
                    actual: 0,
                });
            }
            _ => {}
        }

        let parent_version = current;
        let version = current.unwrap_or(0) + 1;
        entries.insert(
            thread_id.to_string(),
            MemoryEntry {
                state: state.clone(),
                version,
                parent_version,
            },
        );
        Ok(Committed { version })
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointStoreError> {
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointStoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_contract::{Message, StateDelta};

    #[tokio::test]
    async fn roundtrip_with_monotonic_versions() {
        let store = MemoryStore::new();
        let mut state = AgentState::new("t1");

        let c1 = store
            .put_tuple("t1", &state, VersionPrecondition::Any)
            .await
            .unwrap();
        assert_eq!(c1.version, 1);

        StateDelta::new()
            .with_message(Message::user("hello"))
            .apply_to(&mut state);
        let c2 = store
            .put_tuple("t1", &state, VersionPrecondition::Exact(1))
            .await
            .unwrap();
        assert_eq!(c2.version, 2);

        let tuple = store.get_tuple("t1").await.unwrap().unwrap();
        assert_eq!(tuple.version, 2);
        assert_eq!(tuple.parent_version, Some(1));
        assert_eq!(tuple.state.messages.len(), 1);
        assert_eq!(tuple.state.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn exact_precondition_rejects_stale_writer() {
        let store = MemoryStore::new();
        let state = AgentState::new("t1");
        store
            .put_tuple("t1", &state, VersionPrecondition::Any)
            .await
            .unwrap();
        store
            .put_tuple("t1", &state, VersionPrecondition::Exact(1))
            .await
            .unwrap();

        let err = store
            .put_tuple("t1", &state, VersionPrecondition::Exact(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointStoreError::VersionConflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn exact_precondition_on_missing_thread_conflicts() {
        let store = MemoryStore::new();
        let err = store
            .put_tuple("ghost", &AgentState::new("ghost"), VersionPrecondition::Exact(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointStoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = MemoryStore::new();
        for id in ["b", "a", "c"] {
            store
                .put_tuple(id, &AgentState::new(id), VersionPrecondition::Any)
                .await
                .unwrap();
        }
        assert_eq!(store.list().await.unwrap(), vec!["a", "b", "c"]);

        store.delete("b").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a", "c"]);
        assert!(store.get_tuple("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_missing_thread_is_none() {
        let store = MemoryStore::new();
        assert!(store.get_tuple("missing").await.unwrap().is_none());
    }
}
