//! Snapshot store (§4.J): session-scoped save/load/remove of the persisted
//! runtime state, keyed by flow id.
//!
//! The orchestrator writes a [`PersistedSnapshot`] after each committed
//! transition and, on `start(flow, {resume: true})`, attempts to load and
//! rehydrate from it. A schema-version mismatch starts fresh rather than
//! erroring — per §4.J this is a silent fallback, not a fatal condition.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::state::{PersistedSnapshot, SNAPSHOT_SCHEMA_VERSION};

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("no snapshot found for key '{key}'")]
    #[diagnostic(code(flowspire::snapshot::not_found))]
    NotFound { key: String },

    #[error("snapshot backend error: {0}")]
    #[diagnostic(code(flowspire::snapshot::backend))]
    Backend(String),

    #[error("snapshot serialization error: {0}")]
    #[diagnostic(code(flowspire::snapshot::serde))]
    Serde(#[from] serde_json::Error),
}

/// The `storage.save/load/remove` capability from §6.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, key: &str, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError>;
    async fn load(&self, key: &str) -> Result<Option<PersistedSnapshot>, SnapshotError>;
    async fn remove(&self, key: &str) -> Result<(), SnapshotError>;
}

/// Loads `key` and validates its `schemaVersion`; a mismatch or missing
/// snapshot both resolve to `Ok(None)` so the caller starts fresh (§4.J).
#[instrument(skip(store))]
pub async fn load_for_resume(
    store: &dyn SnapshotStore,
    key: &str,
) -> Result<Option<PersistedSnapshot>, SnapshotError> {
    match store.load(key).await? {
        Some(snapshot) if snapshot.schema_version == SNAPSHOT_SCHEMA_VERSION => Ok(Some(snapshot)),
        Some(_) | None => Ok(None),
    }
}

/// Volatile, process-local snapshot store. Always available (ambient test
/// tooling and the zero-dependency default), grounded on the teacher's
/// `InMemoryCheckpointer`.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    entries: RwLock<FxHashMap<String, PersistedSnapshot>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, key: &str, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError> {
        self.entries.write().insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<PersistedSnapshot>, SnapshotError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! Durable snapshot persistence on SQLite, grounded on the teacher's
    //! `SQLiteCheckpointer`.

    use super::{SnapshotError, SnapshotStore};
    use crate::state::PersistedSnapshot;
    use async_trait::async_trait;
    use sqlx::{Row, SqlitePool};
    use tracing::instrument;

    pub struct SqliteSnapshotStore {
        pool: SqlitePool,
    }

    impl SqliteSnapshotStore {
        /// Connects to `database_url` and ensures the `snapshots` table exists.
        ///
        /// # Errors
        /// [`SnapshotError::Backend`] if the connection or migration fails.
        #[instrument(skip(database_url))]
        pub async fn connect(database_url: &str) -> Result<Self, SnapshotError> {
            let pool = SqlitePool::connect(database_url)
                .await
                .map_err(|e| SnapshotError::Backend(e.to_string()))?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS snapshots (
                    key TEXT PRIMARY KEY,
                    schema_version INTEGER NOT NULL,
                    flow_id TEXT NOT NULL,
                    payload TEXT NOT NULL
                )",
            )
            .execute(&pool)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl SnapshotStore for SqliteSnapshotStore {
        async fn save(&self, key: &str, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError> {
            let payload = serde_json::to_string(snapshot)?;
            sqlx::query(
                "INSERT INTO snapshots (key, schema_version, flow_id, payload)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    schema_version = excluded.schema_version,
                    flow_id = excluded.flow_id,
                    payload = excluded.payload",
            )
            .bind(key)
            .bind(snapshot.schema_version)
            .bind(&snapshot.flow_id)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;
            Ok(())
        }

        async fn load(&self, key: &str) -> Result<Option<PersistedSnapshot>, SnapshotError> {
            let row = sqlx::query("SELECT payload FROM snapshots WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SnapshotError::Backend(e.to_string()))?;
            match row {
                Some(row) => {
                    let payload: String = row.try_get("payload").map_err(|e| SnapshotError::Backend(e.to_string()))?;
                    Ok(Some(serde_json::from_str(&payload)?))
                }
                None => Ok(None),
            }
        }

        async fn remove(&self, key: &str) -> Result<(), SnapshotError> {
            sqlx::query("DELETE FROM snapshots WHERE key = ?1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| SnapshotError::Backend(e.to_string()))?;
            Ok(())
        }
    }
}
