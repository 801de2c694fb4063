//! Long-term memory interface.
//!
//! Consumed by outer collaborators (session enrichment, recall tooling);
//! the engine itself never reads from it. Only the contract lives here,
//! implementations are external.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by long-term memory backends.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// One scored recall result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    /// Similarity score, higher is closer.
    pub score: f64,
}

/// Vector-store-backed long-term memory.
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    /// Store content with metadata, returning the record id.
    async fn add(&self, content: &str, metadata: Value) -> Result<String, MemoryError>;

    /// Retrieve the `k` closest records, optionally filtered on metadata.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<MemoryHit>, MemoryError>;

    /// Delete a record.
    async fn delete(&self, id: &str) -> Result<(), MemoryError>;

    /// Replace a record's content and metadata.
    async fn update(&self, id: &str, content: &str, metadata: Value) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Substring-match stand-in, enough to exercise the contract.
    #[derive(Default)]
    struct NaiveMemory {
        records: Mutex<HashMap<String, (String, Value)>>,
        next_id: Mutex<u64>,
    }

    #[async_trait]
    impl LongTermMemory for NaiveMemory {
        async fn add(&self, content: &str, metadata: Value) -> Result<String, MemoryError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = format!("m-{next}");
            self.records
                .lock()
                .unwrap()
                .insert(id.clone(), (content.to_string(), metadata));
            Ok(id)
        }

        async fn search(
            &self,
            query: &str,
            k: usize,
            _filter: Option<&Value>,
        ) -> Result<Vec<MemoryHit>, MemoryError> {
            let records = self.records.lock().unwrap();
            let mut hits: Vec<MemoryHit> = records
                .iter()
                .filter(|(_, (content, _))| content.contains(query))
                .map(|(id, (content, metadata))| MemoryHit {
                    id: id.clone(),
                    content: content.clone(),
                    metadata: metadata.clone(),
                    score: 1.0,
                })
                .collect();
            hits.truncate(k);
            Ok(hits)
        }

        async fn delete(&self, id: &str) -> Result<(), MemoryError> {
            self.records
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))
        }

        async fn update(
            &self,
            id: &str,
            content: &str,
            metadata: Value,
        ) -> Result<(), MemoryError> {
            let mut records = self.records.lock().unwrap();
            if !records.contains_key(id) {
                return Err(MemoryError::NotFound(id.to_string()));
            }
            records.insert(id.to_string(), (content.to_string(), metadata));
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_search_update_delete_cycle() {
        let memory = NaiveMemory::default();
        let id = memory
            .add("the user prefers metric units", serde_json::json!({"kind": "preference"}))
            .await
            .unwrap();

        let hits = memory.search("metric", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        memory
            .update(&id, "the user prefers imperial units", serde_json::json!({}))
            .await
            .unwrap();
        assert!(memory.search("metric", 5, None).await.unwrap().is_empty());

        memory.delete(&id).await.unwrap();
        assert!(matches!(
            memory.delete(&id).await.unwrap_err(),
            MemoryError::NotFound(_)
        ));
    }
}
