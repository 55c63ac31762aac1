// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage for the offline queue and the entity cache.
//!
//! Both live happily in one database file; every row carries its domain.
//!
//! ```sql
//! CREATE TABLE offline_queue (
//!   seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- FIFO order, never reused
//!   local_id TEXT NOT NULL,
//!   domain TEXT NOT NULL,
//!   kind TEXT NOT NULL,                     -- create|update|delete|reorder
//!   payload TEXT NOT NULL,                  -- JSON
//!   created_at INTEGER NOT NULL,
//!   attempt_count INTEGER NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE entity_cache (
//!   domain TEXT NOT NULL,
//!   id TEXT NOT NULL,
//!   entity TEXT NOT NULL,                   -- JSON
//!   last_synced_at INTEGER NOT NULL,
//!   PRIMARY KEY (domain, id)
//! );
//! ```
//!
//! The journal runs in WAL mode with `synchronous = NORMAL`: readers never
//! block the writer and a commit costs one fsync.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::traits::{CacheRecord, OfflineQueue, PersistentCache, QueuedRecord, StorageError};
use crate::entity::Entity;
use crate::mutation::{MutationRecord, OperationKind};
use crate::resilience::retry::{retry, RetryConfig};

const QUEUE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS offline_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        local_id TEXT NOT NULL,
        domain TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0
    )
"#;

const QUEUE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_offline_queue_domain_seq ON offline_queue (domain, seq)";

const CACHE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS entity_cache (
        domain TEXT NOT NULL,
        id TEXT NOT NULL,
        entity TEXT NOT NULL,
        last_synced_at INTEGER NOT NULL,
        PRIMARY KEY (domain, id)
    )
"#;

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Open a pool with startup-mode retry (fails fast if the path is wrong).
async fn connect(url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(backend)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    retry("sqlite_connect", &RetryConfig::startup(), || async {
        SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options.clone())
            .await
            .map_err(backend)
    })
    .await
}

async fn init_schema(pool: &SqlitePool, statements: &[&str]) -> Result<(), StorageError> {
    for sql in statements {
        retry("sqlite_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql).execute(pool).await.map_err(backend)
        })
        .await?;
    }
    Ok(())
}

/// Durable offline queue for one domain.
pub struct SqliteQueue {
    pool: SqlitePool,
    domain: String,
    max_records: Option<u64>,
}

impl SqliteQueue {
    pub async fn open(url: &str, domain: impl Into<String>, max_records: Option<u64>) -> Result<Self, StorageError> {
        let pool = connect(url).await?;
        Self::with_pool(pool, domain, max_records).await
    }

    /// Share an existing pool (e.g. the cache's) instead of opening another.
    pub async fn with_pool(pool: SqlitePool, domain: impl Into<String>, max_records: Option<u64>) -> Result<Self, StorageError> {
        init_schema(&pool, &[QUEUE_SCHEMA, QUEUE_INDEX]).await?;
        let queue = Self {
            pool,
            domain: domain.into(),
            max_records,
        };

        let pending = queue.size().await?;
        if pending > 0 {
            warn!(domain = %queue.domain, pending, "Offline queue has records from previous run, will replay");
        } else {
            info!(domain = %queue.domain, "Offline queue opened");
        }
        Ok(queue)
    }

    #[must_use]
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    fn decode(row: &SqliteRow) -> Result<QueuedRecord, StorageError> {
        let seq: i64 = row.try_get("seq").map_err(backend)?;
        let seq = seq as u64;
        let corrupt = |reason: String| StorageError::Corruption { seq, reason };

        let local_id: String = row.try_get("local_id").map_err(|e| corrupt(e.to_string()))?;
        let domain: String = row.try_get("domain").map_err(|e| corrupt(e.to_string()))?;
        let kind_raw: String = row.try_get("kind").map_err(|e| corrupt(e.to_string()))?;
        let payload_raw: String = row.try_get("payload").map_err(|e| corrupt(e.to_string()))?;
        let created_at: i64 = row.try_get("created_at").map_err(|e| corrupt(e.to_string()))?;
        let attempt_count: i64 = row.try_get("attempt_count").unwrap_or(0);

        let kind = OperationKind::parse(&kind_raw)
            .ok_or_else(|| corrupt(format!("unknown operation kind '{kind_raw}'")))?;
        let payload = serde_json::from_str(&payload_raw)
            .map_err(|e| corrupt(format!("payload is not JSON: {e}")))?;
        if local_id.is_empty() {
            return Err(corrupt("empty local_id".to_string()));
        }

        Ok(QueuedRecord {
            seq,
            record: MutationRecord {
                local_id,
                domain,
                kind,
                payload,
                created_at,
                attempt_count: attempt_count.max(0) as u32,
            },
        })
    }
}

#[async_trait]
impl OfflineQueue for SqliteQueue {
    async fn enqueue(&self, record: &MutationRecord) -> Result<u64, StorageError> {
        if let Some(max) = self.max_records {
            let pending = self.size().await?;
            if pending >= max {
                return Err(StorageError::Full { pending, max });
            }
        }

        let payload = serde_json::to_string(&record.payload)?;
        let result = sqlx::query(
            "INSERT INTO offline_queue (local_id, domain, kind, payload, created_at, attempt_count) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.local_id)
        .bind(&self.domain)
        .bind(record.kind.as_str())
        .bind(payload)
        .bind(record.created_at)
        .bind(i64::from(record.attempt_count))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let seq = result.last_insert_rowid() as u64;
        debug!(domain = %self.domain, seq, local_id = %record.local_id, kind = %record.kind, "Mutation queued");
        Ok(seq)
    }

    async fn peek_oldest(&self) -> Result<Option<QueuedRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT seq, local_id, domain, kind, payload, created_at, attempt_count FROM offline_queue WHERE domain = ? ORDER BY seq ASC LIMIT 1",
        )
        .bind(&self.domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn remove_oldest(&self) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM offline_queue WHERE seq = (SELECT MIN(seq) FROM offline_queue WHERE domain = ?)",
        )
        .bind(&self.domain)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn size(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_queue WHERE domain = ?")
            .bind(&self.domain)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count.max(0) as u64)
    }

    async fn record_attempt(&self) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE offline_queue SET attempt_count = attempt_count + 1 WHERE seq = (SELECT MIN(seq) FROM offline_queue WHERE domain = ?)",
        )
        .bind(&self.domain)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<QueuedRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT seq, local_id, domain, kind, payload, created_at, attempt_count FROM offline_queue WHERE domain = ? ORDER BY seq ASC",
        )
        .bind(&self.domain)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .iter()
            .filter_map(|row| match Self::decode(row) {
                Ok(queued) => Some(queued),
                Err(e) => {
                    warn!(domain = %self.domain, error = %e, "Skipping unreadable queue record");
                    None
                }
            })
            .collect())
    }

    async fn rewrite_local_id(&self, old: &str, new: &str) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let rows = sqlx::query(
            "SELECT seq, local_id, domain, kind, payload, created_at, attempt_count FROM offline_queue WHERE domain = ? ORDER BY seq ASC",
        )
        .bind(&self.domain)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        let mut changed = 0u64;
        for row in &rows {
            // Corrupt rows are left for the replayer to drop
            let Ok(mut queued) = Self::decode(row) else { continue };
            if !queued.record.rewrite_id(old, new) {
                continue;
            }
            let payload = serde_json::to_string(&queued.record.payload)?;
            sqlx::query("UPDATE offline_queue SET local_id = ?, payload = ? WHERE seq = ?")
                .bind(&queued.record.local_id)
                .bind(payload)
                .bind(queued.seq as i64)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            changed += 1;
        }

        tx.commit().await.map_err(backend)?;
        if changed > 0 {
            debug!(domain = %self.domain, old, new, changed, "Rewrote queued references to temporary id");
        }
        Ok(changed)
    }
}

/// Durable entity cache shared by every domain.
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub async fn open(url: &str) -> Result<Self, StorageError> {
        let pool = connect(url).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        init_schema(&pool, &[CACHE_SCHEMA]).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn upsert<'c, E>(executor: E, domain: &str, record: &CacheRecord) -> Result<(), StorageError>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let entity = serde_json::to_string(&record.entity)?;
        sqlx::query(
            "INSERT INTO entity_cache (domain, id, entity, last_synced_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(domain, id) DO UPDATE SET entity = excluded.entity, last_synced_at = excluded.last_synced_at",
        )
        .bind(domain)
        .bind(&record.id)
        .bind(entity)
        .bind(record.last_synced_at)
        .execute(executor)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl PersistentCache for SqliteCache {
    async fn get(&self, domain: &str) -> Result<Vec<CacheRecord>, StorageError> {
        let rows = sqlx::query("SELECT id, entity, last_synced_at FROM entity_cache WHERE domain = ? ORDER BY id")
            .bind(domain)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend)?;
            let raw: String = row.try_get("entity").map_err(backend)?;
            let last_synced_at: i64 = row.try_get("last_synced_at").unwrap_or(0);
            match serde_json::from_str::<Entity>(&raw) {
                Ok(entity) => records.push(CacheRecord {
                    id,
                    domain: domain.to_string(),
                    entity,
                    last_synced_at,
                }),
                // Skipped; the next list fetch repopulates it
                Err(e) => warn!(domain, id = %id, error = %e, "Unreadable cache record skipped"),
            }
        }
        Ok(records)
    }

    async fn put(&self, domain: &str, records: &[CacheRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for record in records {
            Self::upsert(&mut *tx, domain, record).await?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn delete(&self, domain: &str, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM entity_cache WHERE domain = ? AND id = ?")
            .bind(domain)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn replace(&self, domain: &str, records: &[CacheRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM entity_cache WHERE domain = ?")
            .bind(domain)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        for record in records {
            Self::upsert(&mut *tx, domain, record).await?;
        }
        tx.commit().await.map_err(backend)
    }
}
