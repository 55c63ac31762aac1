// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory cache and queue. Not durable; used by tests and hosts that
//! accept losing queued work on restart.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{CacheRecord, OfflineQueue, PersistentCache, QueuedRecord, StorageError};
use crate::mutation::MutationRecord;

pub struct InMemoryCache {
    data: DashMap<String, HashMap<String, CacheRecord>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of records cached for a domain
    #[must_use]
    pub fn len(&self, domain: &str) -> usize {
        self.data.get(domain).map(|d| d.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn contains(&self, domain: &str, id: &str) -> bool {
        self.data.get(domain).is_some_and(|d| d.contains_key(id))
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentCache for InMemoryCache {
    async fn get(&self, domain: &str) -> Result<Vec<CacheRecord>, StorageError> {
        let mut records: Vec<CacheRecord> = self
            .data
            .get(domain)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn put(&self, domain: &str, records: &[CacheRecord]) -> Result<(), StorageError> {
        let mut entry = self.data.entry(domain.to_string()).or_default();
        for record in records {
            entry.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, domain: &str, id: &str) -> Result<(), StorageError> {
        if let Some(mut entry) = self.data.get_mut(domain) {
            entry.remove(id);
        }
        Ok(())
    }
}

struct QueueInner {
    records: VecDeque<QueuedRecord>,
    next_seq: u64,
}

pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    max_records: Option<u64>,
}

impl InMemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_records(None)
    }

    #[must_use]
    pub fn with_max_records(max_records: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::new(),
                next_seq: 1,
            }),
            max_records,
        }
    }

    /// Copy of every queued record, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<MutationRecord> {
        self.inner.lock().records.iter().map(|q| q.record.clone()).collect()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfflineQueue for InMemoryQueue {
    async fn enqueue(&self, record: &MutationRecord) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock();
        let pending = inner.records.len() as u64;
        if let Some(max) = self.max_records {
            if pending >= max {
                return Err(StorageError::Full { pending, max });
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.push_back(QueuedRecord { seq, record: record.clone() });
        Ok(seq)
    }

    async fn peek_oldest(&self) -> Result<Option<QueuedRecord>, StorageError> {
        Ok(self.inner.lock().records.front().cloned())
    }

    async fn remove_oldest(&self) -> Result<(), StorageError> {
        self.inner.lock().records.pop_front();
        Ok(())
    }

    async fn size(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().records.len() as u64)
    }

    async fn record_attempt(&self) -> Result<(), StorageError> {
        if let Some(head) = self.inner.lock().records.front_mut() {
            head.record.attempt_count += 1;
        }
        Ok(())
    }

    async fn rewrite_local_id(&self, old: &str, new: &str) -> Result<u64, StorageError> {
        let mut changed = 0;
        for queued in self.inner.lock().records.iter_mut() {
            if queued.record.rewrite_id(old, new) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn pending(&self) -> Result<Vec<QueuedRecord>, StorageError> {
        Ok(self.inner.lock().records.iter().cloned().collect())
    }
}
