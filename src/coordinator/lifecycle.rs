// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Construction from config, startup hydration, and full refresh.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::SyncCoordinator;
use crate::config::SyncConfig;
use crate::entity::Entity;
use crate::error::{RemoteFailure, SyncError};
use crate::metrics;
use crate::mutation::OperationKind;
use crate::remote::RemoteService;
use crate::state::LocalStateStore;
use crate::storage::memory::{InMemoryCache, InMemoryQueue};
use crate::storage::sql::{SqliteCache, SqliteQueue};
use crate::storage::traits::{CacheRecord, OfflineQueue, PersistentCache, StorageError};

impl SyncCoordinator {
    /// Build a coordinator with storage chosen by `config`: SQLite for each
    /// of `cache_url` / `queue_url` that is set, in-memory otherwise. When
    /// both point at the same database they share one pool.
    ///
    /// # Errors
    ///
    /// [`StorageError::Backend`] if a configured database cannot be opened
    /// after the startup retries.
    pub async fn open(
        store: Arc<LocalStateStore>,
        remote: Arc<dyn RemoteService>,
        config: &SyncConfig,
    ) -> Result<Self, StorageError> {
        let domain = store.domain().to_string();

        let (cache, cache_pool): (Arc<dyn PersistentCache>, _) = match &config.cache_url {
            Some(url) => {
                let cache = SqliteCache::open(url).await?;
                let pool = cache.pool();
                (Arc::new(cache), Some(pool))
            }
            None => (Arc::new(InMemoryCache::new()), None),
        };

        let queue: Arc<dyn OfflineQueue> = match (&config.queue_url, cache_pool) {
            (Some(url), Some(pool)) if config.cache_url.as_ref() == Some(url) => {
                Arc::new(SqliteQueue::with_pool(pool, domain, config.queue_max_records).await?)
            }
            (Some(url), _) => Arc::new(SqliteQueue::open(url, domain, config.queue_max_records).await?),
            (None, _) => Arc::new(InMemoryQueue::with_max_records(config.queue_max_records)),
        };

        Ok(Self::new(store, remote, cache, queue, config))
    }

    /// Load the cached collection into the store, then re-apply every queued
    /// mutation on top so the user sees what they last saw, even offline.
    ///
    /// Cache failures leave the store empty rather than failing. Returns the
    /// number of entities now visible.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn hydrate(&self) -> usize {
        let cached = match self.cache.get(&self.domain).await {
            Ok(records) => records.into_iter().map(|r| r.entity).collect(),
            Err(e) => {
                warn!(error = %e, "Cache unreadable, starting empty");
                metrics::record_cache_error(&self.domain, "get");
                Vec::new()
            }
        };

        let overlaid = self.publish_with_queue(cached).await;
        self.report_queue_depth().await;
        info!(entities = overlaid, "Hydrated from cache");
        overlaid
    }

    /// Fetch the authoritative list, repopulate the cache, and publish it
    /// with queued mutations re-applied on top. Optimistic creates still in
    /// the queue therefore survive a refresh.
    ///
    /// # Errors
    ///
    /// [`SyncError::Remote`] when the list call fails or times out; local
    /// state is left untouched.
    #[instrument(skip(self), fields(domain = %self.domain))]
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let fetched = match tokio::time::timeout(self.send_timeout, self.remote.list(&self.domain)).await {
            Ok(result) => result?,
            Err(_) => {
                metrics::record_timeout(&self.domain);
                return Err(RemoteFailure::timeout(format!("list not answered within {:?}", self.send_timeout)).into());
            }
        };

        let records: Vec<CacheRecord> = fetched
            .iter()
            .map(|e| CacheRecord::from_entity(&self.domain, e.clone()))
            .collect();
        if let Err(e) = self.cache.replace(&self.domain, &records).await {
            warn!(error = %e, "Cache repopulation failed");
            metrics::record_cache_error(&self.domain, "replace");
        }

        let visible = self.publish_with_queue(fetched).await;
        info!(fetched = records.len(), visible, "Refreshed from remote");
        Ok(visible)
    }

    async fn publish_with_queue(&self, base: Vec<Entity>) -> usize {
        let queued = match self.queue.pending().await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(error = %e, "Offline queue unreadable, publishing without queued edits");
                Vec::new()
            }
        };

        let _gate = self.apply_gate.lock();
        self.store.replace_all(base);
        for mut queued in queued {
            let record = &queued.record;
            if record.kind == OperationKind::Create && self.resolve_id(&record.local_id) != record.local_id {
                // Acknowledged but not yet dequeued; the server version is already visible
                continue;
            }
            self.follow_aliases(&mut queued.record);
            self.store.apply_optimistic(&queued.record);
        }
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::SyncConfig;
    use crate::coordinator::SyncCoordinator;
    use crate::entity::Entity;
    use crate::error::{RemoteFailure, SyncError};
    use crate::mutation::MutationRecord;
    use crate::remote::InMemoryRemote;
    use crate::state::LocalStateStore;
    use crate::storage::memory::{InMemoryCache, InMemoryQueue};
    use crate::storage::traits::{CacheRecord, OfflineQueue, PersistentCache};

    fn build(remote: Arc<InMemoryRemote>, cache: Arc<InMemoryCache>, queue: Arc<InMemoryQueue>) -> SyncCoordinator {
        SyncCoordinator::new(
            Arc::new(LocalStateStore::new("articles")),
            remote,
            cache,
            queue,
            &SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_hydrate_overlays_queued_mutations() {
        let cache = Arc::new(InMemoryCache::new());
        cache
            .put("articles", &[
                CacheRecord::from_entity("articles", Entity::new("a1", json!({"title": "Cached", "archived": false}))),
                CacheRecord::from_entity("articles", Entity::new("a2", json!({"title": "Gone soon"}))),
            ])
            .await
            .unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let create = MutationRecord::create("articles", json!({"title": "Saved offline"}));
        queue.enqueue(&create).await.unwrap();
        queue.enqueue(&MutationRecord::update("articles", "a1", json!({"archived": true}))).await.unwrap();
        queue.enqueue(&MutationRecord::delete("articles", "a2")).await.unwrap();

        let coordinator = build(Arc::new(InMemoryRemote::new()), cache, queue.clone());
        assert_eq!(coordinator.hydrate().await, 2);

        let store = coordinator.store();
        assert_eq!(store.get("a1").unwrap().field("archived"), Some(&json!(true)));
        assert!(store.contains(&create.local_id));
        assert!(!store.contains("a2"));
        // Hydration never consumes the queue
        assert_eq!(queue.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_refresh_repopulates_cache_and_keeps_queued_creates() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed("articles", vec![Entity::new("s1", json!({"title": "Server"}))]);
        let cache = Arc::new(InMemoryCache::new());
        cache
            .put("articles", &[CacheRecord::from_entity("articles", Entity::new("stale", json!({})))])
            .await
            .unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let create = MutationRecord::create("articles", json!({"title": "Pending"}));
        queue.enqueue(&create).await.unwrap();

        let coordinator = build(remote, cache.clone(), queue);
        assert_eq!(coordinator.refresh().await.unwrap(), 2);

        assert!(coordinator.store().contains("s1"));
        assert!(coordinator.store().contains(&create.local_id));
        assert!(cache.contains("articles", "s1"));
        assert!(!cache.contains("articles", "stale"));
        assert!(!cache.contains("articles", &create.local_id));
    }

    #[tokio::test]
    async fn test_open_without_urls_uses_memory() {
        let config = SyncConfig { queue_max_records: Some(1), ..Default::default() };
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let coordinator = SyncCoordinator::open(
            Arc::new(LocalStateStore::new("articles")),
            Arc::new(InMemoryRemote::new()),
            &config,
        )
        .await
        .unwrap()
        .with_connectivity(rx);

        coordinator.create(json!({"title": "one"})).await.unwrap();
        // max_records reached the in-memory queue
        assert!(matches!(coordinator.create(json!({"title": "two"})).await, Err(SyncError::QueueUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_state_alone() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_next(RemoteFailure::status(502, "bad gateway"));
        let coordinator = build(remote, Arc::new(InMemoryCache::new()), Arc::new(InMemoryQueue::new()));
        coordinator.store().replace_all(vec![Entity::new("keep", json!({}))]);

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(ref f) if f.status == Some(502)));
        assert!(coordinator.store().contains("keep"));
    }
}
