// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Optimistic Sync
//!
//! An offline-first, optimistic mutation engine for client applications.
//!
//! User actions change local state immediately. The engine then sends each
//! mutation to the remote service, reconciles on acknowledgment, queues it
//! durably on transient failure, and rolls it back on permanent rejection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LocalStateStore                        │
//! │  • Canonical collection per domain, synchronous reads      │
//! │  • Derived views (active, priority-first)                  │
//! └─────────────────────────────────────────────────────────────┘
//!              ▲ apply / reconcile / rollback
//!              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SyncCoordinator                        │
//! │  • One in-flight mutation per entity                       │
//! │  • Timeout + circuit breaker around RemoteService          │
//! │  • Transient → OfflineQueue, Permanent → rollback          │
//! └─────────────────────────────────────────────────────────────┘
//!        │ ack                    │ transient            ▲ replay
//!        ▼                        ▼                      │
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ PersistentCache  │   │   OfflineQueue   │──▶│  QueueReplayer   │
//! │ (memory/SQLite)  │   │ (memory/SQLite)  │   │ on online edge   │
//! └──────────────────┘   └──────────────────┘   └──────────────────┘
//!                                                        ▲
//!                                              ConnectivityMonitor
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use optimistic_sync::{
//!     ConnectivityMonitor, InMemoryRemote, LocalStateStore, QueueReplayer, SqliteCache,
//!     SqliteQueue, SyncConfig, SyncCoordinator, View,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig::default();
//!     let url = "sqlite://sync.db?mode=rwc";
//!     let cache = Arc::new(SqliteCache::open(url).await.expect("cache"));
//!     let queue = Arc::new(SqliteQueue::with_pool(cache.pool(), "projects", None).await.expect("queue"));
//!     let monitor = Arc::new(ConnectivityMonitor::new(true));
//!
//!     let projects = Arc::new(
//!         SyncCoordinator::new(
//!             Arc::new(LocalStateStore::new("projects")),
//!             Arc::new(InMemoryRemote::new()),
//!             cache,
//!             queue,
//!             &config,
//!         )
//!         .with_connectivity(monitor.subscribe()),
//!     );
//!     projects.hydrate().await;
//!
//!     let replayer = QueueReplayer::new().with(projects.clone());
//!     let runner = monitor.clone();
//!     tokio::spawn(async move { runner.run(&replayer).await });
//!
//!     projects.create(json!({"title": "Ship it", "priority": true})).await.ok();
//!     for project in projects.store().view(View::ActivePrioritized) {
//!         println!("{} {:?}", project.id, project.field("title"));
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`state`]: [`LocalStateStore`], snapshots and derived views
//! - [`coordinator`]: the [`SyncCoordinator`] mutation state machine
//! - [`replay`]: [`QueueReplayer`] draining offline queues
//! - [`connectivity`]: [`ConnectivityMonitor`] edge-triggered replay
//! - [`storage`]: cache and queue backends (memory, SQLite)
//! - [`remote`]: the [`RemoteService`] contract
//! - [`resilience`]: circuit breaker, retry
//! - [`error`]: error types and failure classification

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod mutation;
pub mod remote;
pub mod replay;
pub mod resilience;
pub mod state;
pub mod storage;

pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{Resolution, SendOutcome, SyncCoordinator, SyncEvent};
pub use entity::{is_temporary_id, Entity, TEMP_ID_PREFIX};
pub use error::{classify, ClassificationPolicy, FailureCategory, FailureClass, RemoteFailure, SyncError};
pub use mutation::{MutationRecord, MutationState, OperationKind};
pub use remote::{InMemoryRemote, RemoteCall, RemoteService};
pub use replay::{DrainReport, QueueReplayer};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use state::{DomainRules, FieldRules, LocalStateStore, Snapshot, View};
pub use storage::memory::{InMemoryCache, InMemoryQueue};
pub use storage::sql::{SqliteCache, SqliteQueue};
pub use storage::traits::{CacheRecord, OfflineQueue, PersistentCache, QueuedRecord, StorageError};
