// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The remote send path, shared by live mutations and queue replay.

use std::time::Instant;

use tracing::{debug, instrument, warn};

use super::locks::EntityPermit;
use super::types::{ReplayStep, SendOutcome, SyncEvent};
use super::SyncCoordinator;
use crate::entity::{is_temporary_id, Entity};
use crate::error::{classify, FailureCategory, FailureClass, RemoteFailure};
use crate::metrics;
use crate::mutation::{MutationRecord, OperationKind};
use crate::resilience::circuit_breaker::CircuitError;
use crate::storage::traits::CacheRecord;

impl SyncCoordinator {
    /// One classified remote attempt. Never touches local state.
    pub(super) async fn send(&self, record: &MutationRecord) -> SendOutcome {
        let policy = self.policy;
        let started = Instant::now();
        let result = self
            .circuit
            .call(
                |failure: &RemoteFailure| classify(failure, &policy) == FailureClass::Transient,
                || self.call_remote(record),
            )
            .await;
        metrics::record_remote_latency(&self.domain, record.kind.as_str(), started.elapsed());

        match result {
            Ok(entity) => SendOutcome::Acked(entity),
            Err(CircuitError::Rejected) => SendOutcome::TransientFailed(RemoteFailure::new(
                FailureCategory::Unavailable,
                format!("circuit '{}' open", self.circuit.name()),
            )),
            Err(CircuitError::Inner(failure)) => match classify(&failure, &policy) {
                FailureClass::Transient => SendOutcome::TransientFailed(failure),
                FailureClass::Permanent => SendOutcome::PermanentFailed(failure),
            },
        }
    }

    async fn call_remote(&self, record: &MutationRecord) -> Result<Option<Entity>, RemoteFailure> {
        let domain = self.domain.as_str();
        let id = record.local_id.as_str();
        let call = async {
            match record.kind {
                OperationKind::Create => self.remote.create(domain, id, &record.payload).await.map(Some),
                OperationKind::Update | OperationKind::Reorder => {
                    self.remote.update(domain, id, &record.payload).await.map(Some)
                }
                OperationKind::Delete => self.remote.delete(domain, id).await.map(|()| None),
            }
        };

        match tokio::time::timeout(self.send_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout(domain);
                Err(RemoteFailure::timeout(format!("no response within {:?}", self.send_timeout)))
            }
        }
    }

    /// Acked: reconcile, cache, and replace a temporary id everywhere.
    /// Returns the entity's server id.
    pub(super) async fn settle_ack(&self, record: &MutationRecord, server: Option<Entity>, permit: &EntityPermit) -> String {
        let local_id = record.local_id.as_str();

        let Some(server) = server else {
            self.store.remove(local_id);
            if let Err(e) = self.cache.delete(&self.domain, local_id).await {
                warn!(domain = %self.domain, id = local_id, error = %e, "Cache delete failed");
                metrics::record_cache_error(&self.domain, "delete");
            }
            self.emit(SyncEvent::Acked {
                domain: self.domain.clone(),
                local_id: local_id.to_string(),
                id: local_id.to_string(),
            });
            return local_id.to_string();
        };

        let id = server.id.clone();
        let renamed = id != local_id;
        let present = {
            let _gate = self.apply_gate.lock();
            let visible = if permit.has_successors() {
                // Later optimistic edits stay visible until they resolve; only the id changes
                self.store.get(local_id).map_or_else(
                    || server.clone(),
                    |mut local| {
                        local.id = id.clone();
                        local
                    },
                )
            } else {
                server.clone()
            };
            let present = self.store.reconcile(local_id, visible);
            if renamed {
                self.aliases.insert(local_id.to_string(), id.clone());
                self.locks.alias(local_id, &id);
            }
            present
        };

        if present {
            let cached = CacheRecord::from_entity(&self.domain, server);
            if let Err(e) = self.cache.put(&self.domain, &[cached]).await {
                warn!(domain = %self.domain, id = %id, error = %e, "Cache write failed");
                metrics::record_cache_error(&self.domain, "put");
            }
        } else {
            debug!(domain = %self.domain, local_id, "Acknowledged entity no longer in local state");
        }

        if renamed {
            match self.queue.rewrite_local_id(local_id, &id).await {
                Ok(changed) if changed > 0 => debug!(local_id, id = %id, changed, "Queued records now target server id"),
                Ok(_) => {}
                Err(e) => warn!(local_id, id = %id, error = %e, "Could not rewrite queued temporary ids"),
            }
            if let Err(e) = self.cache.delete(&self.domain, local_id).await {
                warn!(domain = %self.domain, id = local_id, error = %e, "Cache delete of temporary id failed");
                metrics::record_cache_error(&self.domain, "delete");
            }
        }
        if record.kind == OperationKind::Create {
            self.acked_creates.insert(local_id.to_string(), id.clone());
        }

        self.emit(SyncEvent::Acked {
            domain: self.domain.clone(),
            local_id: local_id.to_string(),
            id: id.clone(),
        });
        id
    }

    /// Send one queued record through the same path as live mutations.
    /// The caller owns the queue head; this never touches the queue order.
    #[instrument(skip(self, record), fields(domain = %self.domain, local_id = %record.local_id, kind = %record.kind, attempt = record.attempt_count))]
    pub(crate) async fn replay_record(&self, mut record: MutationRecord) -> ReplayStep {
        if record.kind == OperationKind::Create && self.acked_creates.contains_key(&record.local_id) {
            debug!("Create already acknowledged, skipping duplicate");
            return ReplayStep::Deduplicated;
        }

        let ticket = self.locks.register(&self.resolve_id(&record.local_id));
        let permit = ticket.acquire().await;
        self.follow_aliases(&mut record);

        if is_temporary_id(&record.local_id) && self.orphaned.contains(&record.local_id) {
            let failure = RemoteFailure::rejected(format!("create of {} was rejected", record.local_id));
            drop(permit);
            self.locks.prune();
            return ReplayStep::Discarded(failure);
        }

        let step = match self.send(&record).await {
            SendOutcome::Acked(server) => {
                self.settle_ack(&record, server, &permit).await;
                ReplayStep::Acked
            }
            SendOutcome::TransientFailed(failure) => ReplayStep::Retry(failure),
            SendOutcome::PermanentFailed(failure) => {
                if record.kind == OperationKind::Create {
                    // Never acknowledged, so nothing on the server to keep it alive
                    self.orphaned.insert(record.local_id.clone());
                    if self.store.remove(&record.local_id) {
                        debug!("Removed optimistic entity of rejected create");
                    }
                }
                ReplayStep::Discarded(failure)
            }
        };

        drop(permit);
        self.locks.prune();
        step
    }
}
