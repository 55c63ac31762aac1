// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{now_millis, Entity};
use crate::mutation::MutationRecord;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Offline queue full: {pending} records (max {max})")]
    Full { pending: u64, max: u64 },
    #[error("Corrupt queue record at seq {seq}: {reason}")]
    Corruption { seq: u64, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Durable projection of an entity, as last confirmed by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: String,
    pub domain: String,
    pub entity: Entity,
    /// Epoch millis of the acknowledgment or fetch that produced this record
    pub last_synced_at: i64,
}

impl CacheRecord {
    pub fn from_entity(domain: &str, entity: Entity) -> Self {
        Self {
            id: entity.id.clone(),
            domain: domain.to_string(),
            entity,
            last_synced_at: now_millis(),
        }
    }
}

/// A queue record together with its position in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    pub seq: u64,
    pub record: MutationRecord,
}

/// Last-known entity snapshots per domain.
#[async_trait]
pub trait PersistentCache: Send + Sync {
    async fn get(&self, domain: &str) -> Result<Vec<CacheRecord>, StorageError>;
    /// Upsert by id.
    async fn put(&self, domain: &str, records: &[CacheRecord]) -> Result<(), StorageError>;
    async fn delete(&self, domain: &str, id: &str) -> Result<(), StorageError>;

    /// Make the domain's cache hold exactly `records`.
    /// Default implementation deletes stale ids then upserts.
    async fn replace(&self, domain: &str, records: &[CacheRecord]) -> Result<(), StorageError> {
        let keep: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        for existing in self.get(domain).await? {
            if !keep.contains(existing.id.as_str()) {
                self.delete(domain, &existing.id).await?;
            }
        }
        self.put(domain, records).await
    }
}

/// Durable FIFO of mutations waiting for connectivity.
///
/// Records come back from `peek_oldest` in enqueue order and only leave via
/// `remove_oldest`.
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    /// Append; returns the record's sequence number.
    async fn enqueue(&self, record: &MutationRecord) -> Result<u64, StorageError>;

    /// Head of the queue. A head that cannot be decoded is reported as
    /// [`StorageError::Corruption`] and stays in place until removed.
    async fn peek_oldest(&self) -> Result<Option<QueuedRecord>, StorageError>;

    async fn remove_oldest(&self) -> Result<(), StorageError>;

    async fn size(&self) -> Result<u64, StorageError>;

    /// Bump the head record's attempt counter after a failed replay.
    async fn record_attempt(&self) -> Result<(), StorageError>;

    /// Swap a temporary entity id for the server id in every queued record.
    /// Creates keep their own `local_id` (see [`MutationRecord::rewrite_id`]).
    /// Returns the number of records changed.
    async fn rewrite_local_id(&self, old: &str, new: &str) -> Result<u64, StorageError>;

    /// Every readable record in FIFO order, without removing anything.
    /// Corrupt records are skipped; the replayer drops them when they reach
    /// the head.
    async fn pending(&self) -> Result<Vec<QueuedRecord>, StorageError>;

    async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.size().await? == 0)
    }
}
