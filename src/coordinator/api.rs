// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation entry points.
//!
//! Every user action goes through [`SyncCoordinator::submit`]. The helpers
//! (`create`, `update`, `delete`, `reorder`) only build the record.

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::locks::EntityPermit;
use super::types::{PendingMutation, Resolution, SendOutcome, SyncEvent};
use super::SyncCoordinator;
use crate::error::{RemoteFailure, SyncError};
use crate::metrics;
use crate::mutation::{MutationRecord, MutationState};

impl SyncCoordinator {
    /// Apply a mutation optimistically and drive it to a terminal state.
    ///
    /// The local state changes before this awaits anything. The returned
    /// future completes when the mutation is acknowledged, queued, or
    /// rejected (and rolled back).
    ///
    /// # Errors
    ///
    /// - [`SyncError::Rejected`] when the remote permanently refused it
    /// - [`SyncError::QueueUnavailable`] when it needed queueing and the
    ///   queue refused; the optimistic change is rolled back
    #[instrument(skip(self, record), fields(domain = %self.domain, local_id = %record.local_id, kind = %record.kind))]
    pub async fn submit(&self, mut record: MutationRecord) -> Result<Resolution, SyncError> {
        let (ticket, snapshot) = {
            let _gate = self.apply_gate.lock();
            // The UI may still hold a temporary id that was replaced meanwhile
            self.follow_aliases(&mut record);
            let ticket = self.locks.register(&record.local_id);
            let snapshot = self.store.apply_optimistic(&record);
            (ticket, snapshot)
        };

        let mut pending = PendingMutation::new(record, snapshot);
        let permit = ticket.acquire().await;
        self.follow_aliases(&mut pending.record);

        let result = self.drive(&mut pending, &permit).await;
        drop(permit);
        self.locks.prune();
        self.forget_settled_ids().await;
        result
    }

    /// Create an entity with a fresh temporary id.
    pub async fn create(&self, payload: Value) -> Result<Resolution, SyncError> {
        self.submit(MutationRecord::create(self.domain.clone(), payload)).await
    }

    pub async fn update(&self, id: &str, patch: Value) -> Result<Resolution, SyncError> {
        self.submit(MutationRecord::update(self.domain.clone(), id, patch)).await
    }

    pub async fn delete(&self, id: &str) -> Result<Resolution, SyncError> {
        self.submit(MutationRecord::delete(self.domain.clone(), id)).await
    }

    pub async fn reorder(&self, id: &str, position: usize) -> Result<Resolution, SyncError> {
        self.submit(MutationRecord::reorder(self.domain.clone(), id, position)).await
    }

    /// Rewrite a record still carrying a temporary id that was acknowledged
    /// while it waited for the entity lock.
    pub(super) fn follow_aliases(&self, record: &mut MutationRecord) {
        let resolved = self.resolve_id(&record.local_id);
        if resolved != record.local_id {
            let old = record.local_id.clone();
            debug!(old = %old, new = %resolved, "Mutation follows temporary-id replacement");
            record.rewrite_id(&old, &resolved);
        }
    }

    async fn drive(&self, pending: &mut PendingMutation, permit: &EntityPermit) -> Result<Resolution, SyncError> {
        if let Some(reason) = self.defer_reason().await {
            debug!(reason, "Deferring mutation to offline queue");
            return self.defer(pending, None).await;
        }

        pending.state = MutationState::Sent;
        match self.send(&pending.record).await {
            SendOutcome::Acked(server) => {
                let id = self.settle_ack(&pending.record, server, permit).await;
                pending.resolve(MutationState::Acked);
                metrics::record_mutation(&self.domain, pending.record.kind.as_str(), "acked");
                Ok(Resolution::Acked { id })
            }
            SendOutcome::TransientFailed(failure) => {
                debug!(error = %failure, "Transient failure, queueing for replay");
                self.defer(pending, Some(&failure)).await
            }
            SendOutcome::PermanentFailed(failure) => {
                pending.rollback(&self.store);
                warn!(error = %failure, "Mutation rejected by remote, rolled back");
                metrics::record_mutation(&self.domain, pending.record.kind.as_str(), "rejected");
                self.emit(SyncEvent::Rejected {
                    domain: self.domain.clone(),
                    local_id: pending.record.local_id.clone(),
                    kind: pending.record.kind,
                    failure: failure.clone(),
                });
                Err(SyncError::Rejected {
                    local_id: pending.record.local_id.clone(),
                    failure,
                })
            }
        }
    }

    /// Why a new mutation must not go to the network now, if it must not.
    async fn defer_reason(&self) -> Option<&'static str> {
        if !self.is_online() {
            return Some("offline");
        }
        match self.queue.is_empty().await {
            Ok(true) => None,
            Ok(false) => Some("queued mutations pending"),
            Err(e) => {
                warn!(error = %e, "Offline queue unreadable");
                Some("queue unreadable")
            }
        }
    }

    /// TransientFailed: keep the optimistic state and persist the record.
    async fn defer(&self, pending: &mut PendingMutation, failure: Option<&RemoteFailure>) -> Result<Resolution, SyncError> {
        let mut record = pending.record.clone();
        if failure.is_some() {
            record.attempt_count += 1;
        }

        match self.queue.enqueue(&record).await {
            Ok(seq) => {
                pending.resolve(MutationState::TransientFailed);
                info!(seq, attempt = record.attempt_count, "Mutation queued for replay");
                metrics::record_mutation(&self.domain, record.kind.as_str(), "queued");
                self.report_queue_depth().await;
                self.emit(SyncEvent::Queued {
                    domain: self.domain.clone(),
                    local_id: record.local_id.clone(),
                    kind: record.kind,
                });
                Ok(Resolution::Queued { id: record.local_id })
            }
            Err(source) => {
                pending.rollback(&self.store);
                error!(error = %source, "Could not queue mutation, rolled back");
                metrics::record_mutation(&self.domain, record.kind.as_str(), "unqueued");
                Err(SyncError::QueueUnavailable {
                    local_id: record.local_id,
                    source,
                })
            }
        }
    }

    pub(super) async fn report_queue_depth(&self) {
        if let Ok(depth) = self.queue.size().await {
            metrics::set_queue_depth(&self.domain, depth);
        }
    }
}
