//! File-backed checkpoint store: one JSON document per thread.

use async_trait::async_trait;
use ensemble_contract::{
    AgentState, CheckpointStore, CheckpointStoreError, CheckpointTuple, Committed, Version,
    VersionPrecondition,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Durable checkpoint store writing one `<thread_id>.json` per thread.
///
/// Writes go through a temp file and an atomic rename, so readers never
/// observe a torn document. A process-wide mutex serialises writers; the
/// version precondition still protects against multi-process races.
pub struct FileStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct FileDocument {
    version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_version: Option<Version>,
    state: AgentState,
}

impl FileStore {
    /// Create a file store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf, CheckpointStoreError> {
        Self::validate_thread_id(thread_id)?;
        Ok(self.base_path.join(format!("{thread_id}.json")))
    }

    /// Validate that a thread id is safe for use as a filename.
    /// Rejects path separators, `..`, and control characters.
    fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointStoreError> {
        if thread_id.is_empty() {
            return Err(CheckpointStoreError::InvalidId(
                "thread id cannot be empty".to_string(),
            ));
        }
        if thread_id.contains('/')
            || thread_id.contains('\\')
            || thread_id.contains("..")
            || thread_id.contains('\0')
        {
            return Err(CheckpointStoreError::InvalidId(format!(
                "thread id contains invalid characters: {thread_id:?}"
            )));
        }
        if thread_id.chars().any(|c| c.is_control()) {
            return Err(CheckpointStoreError::InvalidId(format!(
                "thread id contains control characters: {thread_id:?}"
            )));
        }
        Ok(())
    }

    async fn load_document(
        &self,
        thread_id: &str,
    ) -> Result<Option<FileDocument>, CheckpointStoreError> {
        let path = self.thread_path(thread_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let doc: FileDocument = serde_json::from_str(&content)
            .map_err(|e| CheckpointStoreError::Serialization(e.to_string()))?;
        Ok(Some(doc))
    }

    async fn save_document(&self, doc: &FileDocument) -> Result<(), CheckpointStoreError> {
        if !self.base_path.exists() {
            tokio::fs::create_dir_all(&self.base_path).await?;
        }
        let path = self.thread_path(&doc.state.thread_id)?;
        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| CheckpointStoreError::Serialization(e.to_string()))?;

        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            doc.state.thread_id,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            match tokio::fs::rename(&tmp_path, &path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::fs::remove_file(&path).await?;
                    tokio::fs::rename(&tmp_path, &path).await?;
                }
                Err(e) => return Err(e),
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CheckpointStoreError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn setup(&self) -> Result<(), CheckpointStoreError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn get_tuple(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError> {
        Ok(self.load_document(thread_id).await?.map(|doc| CheckpointTuple {
            state: doc.state,
            version: doc.version,
            parent_version: doc.parent_version,
        }))
    }

    async fn put_tuple(
        &self,
        thread_id: &str,
        state: &AgentState,
        precondition: VersionPrecondition,
    ) -> Result<Committed, CheckpointStoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self.load_document(thread_id).await?.map(|d| d.version);
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

        let version = current.unwrap_or(0) + 1;
        let doc = FileDocument {
            version,
            parent_version: current,
            state: state.clone(),
        };
        self.save_document(&doc).await?;
        Ok(Committed { version })
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointStoreError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointStoreError> {
        let path = self.thread_path(thread_id)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
