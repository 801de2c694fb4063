//! Server-backed checkpoint store on PostgreSQL (feature `postgres`).

use async_trait::async_trait;
use ensemble_contract::{
    AgentState, CheckpointStore, CheckpointStoreError, CheckpointTuple, Committed, Version,
    VersionPrecondition,
};

/// PostgreSQL checkpoint store: one row per thread with a JSONB snapshot.
///
/// `put_tuple` runs inside a transaction with `SELECT ... FOR UPDATE`,
/// which serialises writers per thread across processes.
pub struct PostgresStore {
    pool: sqlx::PgPool,
    table: String,
}

impl PostgresStore {
    /// Connect to the database and run [`CheckpointStore::setup`].
    pub async fn connect(url: &str) -> Result<Self, CheckpointStoreError> {
        let pool = sqlx::PgPool::connect(url)
            .await
            .map_err(|e| CheckpointStoreError::Backend(e.to_string()))?;
        let store = Self::new(pool);
        store.setup().await?;
        Ok(store)
    }

    /// Create a store over an existing pool. Threads live in `agent_threads`.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            table: "agent_threads".to_string(),
        }
    }

    /// Use a custom table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn backend_err(e: sqlx::Error) -> CheckpointStoreError {
        CheckpointStoreError::Backend(e.to_string())
    }
}

#[async_trait]
impl CheckpointStore for PostgresStore {
    async fn setup(&self) -> Result<(), CheckpointStoreError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                thread_id      TEXT PRIMARY KEY,
                version        BIGINT NOT NULL,
                parent_version BIGINT,
                state          JSONB NOT NULL,
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table = self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get_tuple(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError> {
        let sql = format!(
            "SELECT version, parent_version, state FROM {} WHERE thread_id = $1",
            self.table
        );
        let row: Option<(i64, Option<i64>, serde_json::Value)> = sqlx::query_as(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::backend_err)?;

        let Some((version, parent_version, state)) = row else {
            return Ok(None);
        };
        let state: AgentState = serde_json::from_value(state)
            .map_err(|e| CheckpointStoreError::Serialization(e.to_string()))?;
        Ok(Some(CheckpointTuple {
            state,
            version: version as Version,
            parent_version: parent_version.map(|v| v as Version),
        }))
    }

    async fn put_tuple(
        &self,
        thread_id: &str,
        state: &AgentState,
        precondition: VersionPrecondition,
    ) -> Result<Committed, CheckpointStoreError> {
        let mut tx = self.pool.begin().await.map_err(Self::backend_err)?;

        let select = format!(
            "SELECT version FROM {} WHERE thread_id = $1 FOR UPDATE",
            self.table
        );
        let current: Option<(i64,)> = sqlx::query_as(&select)
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::backend_err)?;
        let current = current.map(|(v,)| v as Version);

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
        let body = serde_json::to_value(state)
            .map_err(|e| CheckpointStoreError::Serialization(e.to_string()))?;
        let upsert = format!(
            r#"
            INSERT INTO {table} (thread_id, version, parent_version, state, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (thread_id)
            DO UPDATE SET version = $2, parent_version = $3, state = $4, updated_at = now()
            "#,
            table = self.table
        );
        sqlx::query(&upsert)
            .bind(thread_id)
            .bind(version as i64)
            .bind(current.map(|v| v as i64))
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(Self::backend_err)?;

        tx.commit().await.map_err(Self::backend_err)?;
        Ok(Committed { version })
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointStoreError> {
        let sql = format!("SELECT thread_id FROM {} ORDER BY thread_id", self.table);
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::backend_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointStoreError> {
        let sql = format!("DELETE FROM {} WHERE thread_id = $1", self.table);
        sqlx::query(&sql)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(Self::backend_err)?;
        Ok(())
    }
}
