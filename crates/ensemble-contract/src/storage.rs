//! Checkpoint store contract.
//!
//! A checkpoint store persists [`AgentState`] per thread with strictly
//! increasing versions. `put_tuple` is atomic: either the new checkpoint
//! is fully visible to subsequent readers or nothing changed. Stores
//! guarantee at most one writer per thread through the version
//! precondition: a writer that lost the race gets a
//! [`CheckpointStoreError::VersionConflict`] instead of clobbering state.

use crate::state::AgentState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic checkpoint version, starting at 1 for the first write.
pub type Version = u64;

/// Errors surfaced by checkpoint stores.
///
/// The engine treats these as fatal for the turn; it never retries a
/// checkpoint write because tool side effects must not be repeated.
#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: Version, actual: Version },

    #[error("invalid thread id: {0}")]
    InvalidId(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A checkpoint read back from a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    /// The persisted state snapshot.
    pub state: AgentState,
    /// Version of this checkpoint.
    pub version: Version,
    /// Version this checkpoint was derived from, absent for the first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<Version>,
}

/// Result of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub version: Version,
}

/// Concurrency precondition for `put_tuple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPrecondition {
    /// Write unconditionally; creates the thread when absent.
    Any,
    /// Write only if the current version matches exactly.
    Exact(Version),
}

/// Pluggable per-thread persistence of agent state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Idempotent backend initialisation (create tables, directories).
    async fn setup(&self) -> Result<(), CheckpointStoreError> {
        Ok(())
    }

    /// Load the latest checkpoint for a thread.
    async fn get_tuple(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError>;

    /// Persist a new checkpoint, returning its version.
    async fn put_tuple(
        &self,
        thread_id: &str,
        state: &AgentState,
        precondition: VersionPrecondition,
    ) -> Result<Committed, CheckpointStoreError>;

    /// List known thread ids, sorted.
    async fn list(&self) -> Result<Vec<String>, CheckpointStoreError>;

    /// Delete a thread's state and history.
    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointStoreError>;

    /// Load only the state for a thread. Convenience wrapper.
    async fn load_state(
        &self,
        thread_id: &str,
    ) -> Result<Option<AgentState>, CheckpointStoreError> {
        Ok(self.get_tuple(thread_id).await?.map(|t| t.state))
    }
}
