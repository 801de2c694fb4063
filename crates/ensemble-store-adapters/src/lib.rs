//! Checkpoint store backends.
//!
//! Three adapters implement `ensemble_contract::CheckpointStore`:
//!
//! - [`MemoryStore`]: process-local map, for unit tests and single-process use
//! - [`FileStore`]: one JSON file per thread with atomic replace
//! - `PostgresStore`: server-backed JSONB table (feature `postgres`)
//!
//! [`store_from_config`] selects a backend from a single configuration
//! string; an unknown or unavailable backend falls back to memory with a
//! warning.

mod file_store;
mod memory_store;
#[cfg(feature = "postgres")]
mod postgres_store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresStore;

use ensemble_contract::CheckpointStore;
use std::sync::Arc;

/// Build a checkpoint store from a configuration string.
///
/// Recognised forms:
///
/// - `memory`
/// - `file:<directory>`
/// - `postgres:<connection-url>` (requires the `postgres` feature)
///
/// Anything else falls back to the in-memory store with a warning, so a
/// misconfigured deployment still starts.
pub async fn store_from_config(config: &str) -> Arc<dyn CheckpointStore> {
    let config = config.trim();
    if config.is_empty() || config == "memory" {
        return Arc::new(MemoryStore::new());
    }
    if let Some(dir) = config.strip_prefix("file:") {
        return Arc::new(FileStore::new(dir));
    }
    #[cfg(feature = "postgres")]
    if let Some(url) = config.strip_prefix("postgres:") {
        match PostgresStore::connect(url).await {
            Ok(store) => return Arc::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "postgres checkpoint backend unavailable, falling back to memory");
                return Arc::new(MemoryStore::new());
            }
        }
    }
    tracing::warn!(backend = %config, "unknown checkpoint backend, falling back to memory");
    Arc::new(MemoryStore::new())
}
