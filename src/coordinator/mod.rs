// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] owns one domain's mutation lifecycle:
//! - optimistic apply to the [`LocalStateStore`]
//! - one remote send per entity at a time, bounded by a timeout and a circuit breaker
//! - reconcile + cache write on acknowledgment
//! - offline queue on transient failure (optimistic state kept)
//! - rollback on permanent failure
//!
//! # Mutation states
//!
//! ```text
//! Pending → Sent → Acked
//!                → TransientFailed  → offline queue → replay
//!                → PermanentFailed  → rollback, SyncError::Rejected
//! Pending → TransientFailed          (offline, or queue not empty)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use optimistic_sync::{
//!     InMemoryCache, InMemoryQueue, InMemoryRemote, LocalStateStore, SyncConfig,
//!     SyncCoordinator, View,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let coordinator = SyncCoordinator::new(
//!     Arc::new(LocalStateStore::new("projects")),
//!     Arc::new(InMemoryRemote::new()),
//!     Arc::new(InMemoryCache::new()),
//!     Arc::new(InMemoryQueue::new()),
//!     &SyncConfig::default(),
//! );
//!
//! coordinator.hydrate().await;
//! let resolution = coordinator.create(json!({"title": "Launch"})).await.expect("create");
//! println!("{resolution}: {:?}", coordinator.store().view(View::Prioritized));
//! # }
//! ```

mod api;
mod lifecycle;
mod locks;
mod send;
mod types;

pub use types::{Resolution, SendOutcome, SyncEvent};
pub(crate) use types::ReplayStep;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::config::SyncConfig;
use crate::error::ClassificationPolicy;
use crate::remote::RemoteService;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::state::LocalStateStore;
use crate::storage::traits::{OfflineQueue, PersistentCache};

use locks::EntityLocks;

/// Orchestrates optimistic mutations for one domain.
///
/// Constructed with its collaborators injected, so several instances (tests,
/// tenants, domains) never share hidden state.
pub struct SyncCoordinator {
    pub(super) domain: String,
    pub(super) store: Arc<LocalStateStore>,
    pub(super) remote: Arc<dyn RemoteService>,
    pub(super) cache: Arc<dyn PersistentCache>,
    pub(super) queue: Arc<dyn OfflineQueue>,

    /// Shared with other coordinators talking to the same backend
    pub(super) circuit: Arc<CircuitBreaker>,
    pub(super) policy: ClassificationPolicy,
    pub(super) send_timeout: Duration,

    /// Connectivity as last reported; `None` means assume online
    pub(super) online: Option<watch::Receiver<bool>>,

    /// One `Sent` mutation per entity
    pub(super) locks: EntityLocks,

    /// Serializes "register + apply" against "check successors + reconcile"
    pub(super) apply_gate: Mutex<()>,

    /// Temporary id -> server id, for mutations still holding the old id
    pub(crate) aliases: DashMap<String, String>,

    /// Temporary ids whose create was acknowledged (replay dedup)
    pub(crate) acked_creates: DashMap<String, String>,

    /// Temporary ids whose create was permanently rejected during replay
    pub(crate) orphaned: DashSet<String>,

    pub(super) events: broadcast::Sender<SyncEvent>,

    /// Set while a replay drain runs; see `QueueReplayer`
    pub(crate) draining: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStateStore>,
        remote: Arc<dyn RemoteService>,
        cache: Arc<dyn PersistentCache>,
        queue: Arc<dyn OfflineQueue>,
        config: &SyncConfig,
    ) -> Self {
        let domain = store.domain().to_string();
        let circuit = Arc::new(CircuitBreaker::new(format!("remote:{domain}"), config.circuit_config()));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            domain,
            store,
            remote,
            cache,
            queue,
            circuit,
            policy: config.classification_policy(),
            send_timeout: config.send_timeout(),
            online: None,
            locks: EntityLocks::default(),
            apply_gate: Mutex::new(()),
            aliases: DashMap::new(),
            acked_creates: DashMap::new(),
            orphaned: DashSet::new(),
            events,
            draining: AtomicBool::new(false),
        }
    }

    /// Follow a connectivity signal. While it reads `false`, mutations are
    /// queued without a network attempt.
    #[must_use]
    pub fn with_connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.online = Some(online);
        self
    }

    /// Share one circuit breaker between coordinators of the same backend.
    #[must_use]
    pub fn with_circuit(mut self, circuit: Arc<CircuitBreaker>) -> Self {
        self.circuit = circuit;
        self
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LocalStateStore> {
        &self.store
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn OfflineQueue> {
        &self.queue
    }

    #[must_use]
    pub fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.circuit
    }

    /// Subscribe to sync events. Slow subscribers miss old events rather than
    /// blocking the engine.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.as_ref().map_or(true, |rx| *rx.borrow())
    }

    /// Drop temporary-id bookkeeping once nothing can refer to it: no queued
    /// record and no mutation holding or waiting on an entity. Returns the
    /// number of entries released.
    pub(crate) async fn forget_settled_ids(&self) -> usize {
        if self.aliases.is_empty() && self.acked_creates.is_empty() && self.orphaned.is_empty() {
            return 0;
        }
        if !self.locks.is_idle() || !matches!(self.queue.is_empty().await, Ok(true)) {
            return 0;
        }

        // Registration and alias insertion both happen under the gate
        let _gate = self.apply_gate.lock();
        if !self.locks.is_idle() {
            return 0;
        }
        let released = self.aliases.len() + self.acked_creates.len() + self.orphaned.len();
        self.aliases.clear();
        self.acked_creates.clear();
        self.orphaned.clear();
        trace!(domain = %self.domain, released, "Released settled temporary ids");
        released
    }

    /// Current id for an entity, following temporary-id replacements.
    #[must_use]
    pub fn resolve_id(&self, id: &str) -> String {
        let mut current = id.to_string();
        while let Some(next) = self.aliases.get(&current).map(|n| n.clone()) {
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    pub(super) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        if self.events.send(event).is_err() {
            trace!(domain = %self.domain, "Sync event dropped, no subscribers");
        }
    }
}
