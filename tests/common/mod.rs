// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use optimistic_sync::{
    Entity, InMemoryCache, InMemoryQueue, InMemoryRemote, LocalStateStore, OfflineQueue,
    PersistentCache, QueueReplayer, SyncConfig, SyncCoordinator,
};

/// One domain wired to in-memory storage and a switchable connectivity flag.
pub struct Harness {
    pub coordinator: Arc<SyncCoordinator>,
    pub replayer: QueueReplayer,
    pub remote: Arc<InMemoryRemote>,
    pub cache: Arc<InMemoryCache>,
    pub queue: Arc<InMemoryQueue>,
    pub online: watch::Sender<bool>,
}

impl Harness {
    pub fn new(domain: &str, online: bool) -> Self {
        Self::with_remote(domain, online, InMemoryRemote::new())
    }

    pub fn with_remote(domain: &str, online: bool, remote: InMemoryRemote) -> Self {
        let remote = Arc::new(remote);
        let cache = Arc::new(InMemoryCache::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (tx, rx) = watch::channel(online);
        let config = SyncConfig {
            circuit_failure_threshold: 1_000,
            ..Default::default()
        };
        let coordinator = Arc::new(
            SyncCoordinator::new(
                Arc::new(LocalStateStore::new(domain)),
                remote.clone(),
                cache.clone(),
                queue.clone(),
                &config,
            )
            .with_connectivity(rx),
        );
        let replayer = QueueReplayer::new().with(coordinator.clone());
        Self { coordinator, replayer, remote, cache, queue, online: tx }
    }

    /// Seed the same entities on the remote and in local state.
    pub fn seed(&self, entities: Vec<Entity>) {
        self.remote.seed(self.coordinator.domain(), entities.clone());
        self.coordinator.store().replace_all(entities);
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    pub async fn queued(&self) -> u64 {
        self.queue.size().await.unwrap()
    }

    pub async fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .get(self.coordinator.domain())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }
}

/// Entity ids and fields, ignoring timestamps.
pub fn contents(entities: &[Entity]) -> Vec<(String, Map<String, Value>)> {
    entities.iter().map(|e| (e.id.clone(), e.fields.clone())).collect()
}
