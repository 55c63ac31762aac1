// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity signal and replay trigger.
//!
//! The host reports connectivity with [`ConnectivityMonitor::set_online`].
//! Coordinators read the current value through a `watch` receiver; the
//! monitor's [`run`](ConnectivityMonitor::run) loop drains every queue once
//! per offline→online edge. Edges that arrive while a drain is running fold
//! into a single follow-up drain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::replay::QueueReplayer;

pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
    edge: Notify,
    transitions: AtomicU64,
    stopped: AtomicBool,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        metrics::set_online(initially_online);
        Self {
            online,
            edge: Notify::new(),
            transitions: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Receiver for [`SyncCoordinator::with_connectivity`](crate::SyncCoordinator::with_connectivity).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Offline→online edges seen so far.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Acquire)
    }

    /// Report connectivity. Repeating the current value is a no-op.
    /// Returns whether this call was an offline→online edge.
    pub fn set_online(&self, online: bool) -> bool {
        let mut came_online = false;
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            came_online = online;
            *current = online;
            true
        });
        if !changed {
            return false;
        }

        metrics::set_online(online);
        if came_online {
            self.transitions.fetch_add(1, Ordering::AcqRel);
            info!("Connectivity restored, scheduling queue replay");
            self.edge.notify_one();
        } else {
            info!("Connectivity lost, mutations will queue");
        }
        came_online
    }

    /// Make [`run`](Self::run) return after its current drain.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.edge.notify_one();
    }

    /// Drain all queues now if online, then once per offline→online edge.
    /// Never retries on its own; a stopped drain waits for the next edge.
    pub async fn run(&self, replayer: &QueueReplayer) {
        if self.is_online() {
            Self::drain(replayer).await;
        }
        loop {
            self.edge.notified().await;
            if self.stopped.load(Ordering::Acquire) {
                debug!("Connectivity monitor stopped");
                return;
            }
            // The edge may be stale by the time we wake
            if self.is_online() {
                Self::drain(replayer).await;
            }
        }
    }

    async fn drain(replayer: &QueueReplayer) {
        for result in replayer.drain_all().await {
            if let Err(e) = result {
                warn!(error = %e, "Queue drain failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::SyncConfig;
    use crate::coordinator::SyncCoordinator;
    use crate::mutation::MutationRecord;
    use crate::remote::InMemoryRemote;
    use crate::state::LocalStateStore;
    use crate::storage::memory::{InMemoryCache, InMemoryQueue};
    use crate::storage::traits::OfflineQueue;

    #[test]
    fn test_set_online_is_edge_triggered() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(!monitor.set_online(true));
        assert!(!monitor.set_online(false));
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert_eq!(monitor.transitions(), 1);
    }

    #[test]
    fn test_subscribers_see_current_value() {
        let monitor = ConnectivityMonitor::new(false);
        let rx = monitor.subscribe();
        assert!(!*rx.borrow());
        monitor.set_online(true);
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_run_drains_on_reconnect() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let queue = Arc::new(InMemoryQueue::new());
        let coordinator = Arc::new(
            SyncCoordinator::new(
                Arc::new(LocalStateStore::new("projects")),
                Arc::new(InMemoryRemote::new()),
                Arc::new(InMemoryCache::new()),
                queue.clone(),
                &SyncConfig::default(),
            )
            .with_connectivity(monitor.subscribe()),
        );
        coordinator.create(json!({"title": "offline"})).await.unwrap();
        queue.enqueue(&MutationRecord::create("projects", json!({"title": "also"}))).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 2);

        let replayer = QueueReplayer::new().with(coordinator.clone());
        let runner = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run(&replayer).await })
        };

        monitor.set_online(true);
        for _ in 0..50 {
            if queue.is_empty().await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(coordinator.store().len(), 2);

        monitor.stop();
        tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
    }
}
