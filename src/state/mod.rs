// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local, UI-facing state for one domain.
//!
//! The [`LocalStateStore`] owns the canonical entity collection. It is the
//! only thing user actions mutate directly, and it never performs I/O: the
//! coordinator decides what to send, queue, cache or roll back.
//!
//! Reads clone an `Arc` of the published collection and never wait on a
//! remote call. All writers go through one `RwLock` write section, so
//! `apply_optimistic`, `reconcile` and `rollback` are serialized per domain.
//!
//! # Example
//!
//! ```
//! use optimistic_sync::{LocalStateStore, MutationRecord, View};
//! use serde_json::json;
//!
//! let store = LocalStateStore::new("projects");
//! let create = MutationRecord::create("projects", json!({"title": "Draft"}));
//! let snapshot = store.apply_optimistic(&create);
//! assert_eq!(store.len(), 1);
//!
//! store.rollback(&snapshot);
//! assert!(store.view(View::All).is_empty());
//! ```

mod view;

pub use view::{compare, project, DomainRules, FieldRules, View};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::entity::Entity;
use crate::mutation::{MutationRecord, OperationKind};

/// Immutable copy of a collection taken right before an optimistic apply.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entities: Arc<Vec<Entity>>,
    /// Store version published by the apply that produced this snapshot
    applied_version: u64,
}

impl Snapshot {
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

pub struct LocalStateStore {
    domain: String,
    current: RwLock<Arc<Vec<Entity>>>,
    rules: Arc<dyn DomainRules>,
    version: watch::Sender<u64>,
}

impl LocalStateStore {
    pub fn new(domain: impl Into<String>) -> Self {
        Self::with_rules(domain, Arc::new(FieldRules::default()))
    }

    pub fn with_rules(domain: impl Into<String>, rules: Arc<dyn DomainRules>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            domain: domain.into(),
            current: RwLock::new(Arc::new(Vec::new())),
            rules,
            version,
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Current published collection in canonical order.
    #[must_use]
    pub fn entities(&self) -> Arc<Vec<Entity>> {
        self.current.read().clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.current.read().iter().find(|e| e.id == id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.current.read().iter().any(|e| e.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    #[must_use]
    pub fn view(&self, view: View) -> Vec<Entity> {
        let entities = self.entities();
        project(&entities, self.rules.as_ref(), view)
    }

    /// Bumped on every publish; UI layers re-read on change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Apply a mutation to the visible state and return what it replaced.
    pub fn apply_optimistic(&self, record: &MutationRecord) -> Snapshot {
        let mut current = self.current.write();
        let before = current.clone();
        let mut next: Vec<Entity> = current.as_ref().clone();
        let id = record.local_id.as_str();

        match record.kind {
            OperationKind::Create => match next.iter_mut().find(|e| e.id == id) {
                Some(existing) => existing.merge(&record.payload),
                None => next.push(Entity::new(id, record.payload.clone())),
            },
            OperationKind::Update => match next.iter_mut().find(|e| e.id == id) {
                Some(existing) => existing.merge(&record.payload),
                None => debug!(domain = %self.domain, id, "Update for entity not in local state"),
            },
            OperationKind::Delete => next.retain(|e| e.id != id),
            OperationKind::Reorder => {
                if let Some(idx) = next.iter().position(|e| e.id == id) {
                    let mut entity = next.remove(idx);
                    entity.merge(&record.payload);
                    let target = record.position().unwrap_or(idx).min(next.len());
                    next.insert(target, entity);
                }
            }
        }

        trace!(domain = %self.domain, id, kind = %record.kind, "Optimistic apply");
        let applied_version = self.publish(&mut current, next);
        Snapshot { entities: before, applied_version }
    }

    /// Replace the optimistic entity with the server's version.
    ///
    /// Matches on `local_id` first, then on the server id. A leftover
    /// duplicate carrying the other id is dropped. Returns `false` when
    /// neither id is present (the entity was deleted locally meanwhile).
    pub fn reconcile(&self, local_id: &str, server: Entity) -> bool {
        let mut current = self.current.write();
        let mut next: Vec<Entity> = current.as_ref().clone();

        let local_idx = next.iter().position(|e| e.id == local_id);
        let server_idx = if server.id == local_id {
            None
        } else {
            next.iter().position(|e| e.id == server.id)
        };

        let idx = match (local_idx, server_idx) {
            (Some(l), Some(s)) => {
                next.remove(s);
                if s < l { l - 1 } else { l }
            }
            (Some(l), None) => l,
            (None, Some(s)) => s,
            (None, None) => return false,
        };

        next[idx] = server;
        if let Some(position) = self.rules.position_of(&next[idx]) {
            let entity = next.remove(idx);
            let target = position.min(next.len());
            next.insert(target, entity);
        }

        debug!(domain = %self.domain, local_id, "Reconciled with server entity");
        self.publish(&mut current, next);
        true
    }

    /// Restore exactly the given snapshot.
    pub fn rollback(&self, snapshot: &Snapshot) {
        let mut current = self.current.write();
        debug!(domain = %self.domain, entities = snapshot.entities.len(), "Rolling back to snapshot");
        self.publish(&mut current, snapshot.entities.as_ref().clone());
    }

    /// Undo one mutation. Restores the snapshot exactly when nothing else was
    /// published since it was taken. Otherwise only the mutated entity goes
    /// back to its snapshot state and position, so later optimistic changes
    /// to other entities survive. `current_id` differs from `snapshot_id`
    /// when the entity was renamed by a temporary-id replacement meanwhile.
    pub fn revert(&self, snapshot: &Snapshot, snapshot_id: &str, current_id: &str) {
        let mut current = self.current.write();
        if *self.version.borrow() == snapshot.applied_version {
            self.publish(&mut current, snapshot.entities.as_ref().clone());
            return;
        }

        let mut next: Vec<Entity> = current
            .iter()
            .filter(|e| e.id != snapshot_id && e.id != current_id)
            .cloned()
            .collect();
        if let Some(idx) = snapshot.entities.iter().position(|e| e.id == snapshot_id) {
            let mut restored = snapshot.entities[idx].clone();
            restored.id = current_id.to_string();
            let target = idx.min(next.len());
            next.insert(target, restored);
        }
        debug!(domain = %self.domain, id = current_id, "Reverted single entity");
        self.publish(&mut current, next);
    }

    /// Drop one entity. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut current = self.current.write();
        if !current.iter().any(|e| e.id == id) {
            return false;
        }
        let next = current.iter().filter(|e| e.id != id).cloned().collect();
        self.publish(&mut current, next);
        true
    }

    /// Replace the whole collection (cache hydration, remote refresh).
    pub fn replace_all(&self, entities: Vec<Entity>) {
        let mut current = self.current.write();
        self.publish(&mut current, entities);
    }

    fn publish(&self, current: &mut Arc<Vec<Entity>>, next: Vec<Entity>) -> u64 {
        *current = Arc::new(next);
        self.version.send_modify(|v| *v += 1);
        *self.version.borrow()
    }
}
