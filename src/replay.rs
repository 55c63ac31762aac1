// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline queue replay.
//!
//! [`QueueReplayer::drain`] walks one domain's queue head-first through the
//! coordinator's send path:
//!
//! | Head record result     | Action                                      |
//! |------------------------|---------------------------------------------|
//! | acknowledged           | remove, continue                            |
//! | duplicate of an ack    | remove, continue                            |
//! | permanently rejected   | remove, emit `Discarded`, continue          |
//! | unreadable             | remove, emit `CorruptRecordDropped`, continue |
//! | transient failure      | bump attempt count, stop                    |
//!
//! Stopping at the first transient failure keeps FIFO order: nothing behind
//! a stuck record is sent before it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::coordinator::{ReplayStep, SyncCoordinator, SyncEvent};
use crate::error::SyncError;
use crate::metrics;
use crate::storage::traits::StorageError;

/// Result of one drain of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub domain: String,
    /// Acknowledged (including deduplicated) and removed
    pub replayed: usize,
    /// Permanently rejected and removed
    pub discarded: usize,
    /// Unreadable records removed
    pub corrupt: usize,
    /// Stopped at a transient failure with records left
    pub stopped: bool,
    /// Another drain of this domain was already running; nothing was done
    pub coalesced: bool,
    /// Records still queued afterwards
    pub remaining: u64,
}

/// Clears the drain flag on every exit path.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains offline queues, one coordinator per domain.
#[derive(Default, Clone)]
pub struct QueueReplayer {
    coordinators: HashMap<String, Arc<SyncCoordinator>>,
}

impl QueueReplayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator under its domain, replacing any previous one.
    #[must_use]
    pub fn with(mut self, coordinator: Arc<SyncCoordinator>) -> Self {
        self.coordinators.insert(coordinator.domain().to_string(), coordinator);
        self
    }

    #[must_use]
    pub fn coordinator(&self, domain: &str) -> Option<&Arc<SyncCoordinator>> {
        self.coordinators.get(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.coordinators.keys().map(String::as_str)
    }

    /// Replay one domain's queue until it is empty or a record fails transiently.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownDomain`] if no coordinator is registered
    /// - [`SyncError::Storage`] if the queue itself cannot be read or trimmed
    #[instrument(skip(self))]
    pub async fn drain(&self, domain: &str) -> Result<DrainReport, SyncError> {
        let coordinator = self
            .coordinators
            .get(domain)
            .ok_or_else(|| SyncError::UnknownDomain(domain.to_string()))?;

        let mut report = DrainReport {
            domain: domain.to_string(),
            ..Default::default()
        };

        if coordinator
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already running, coalescing");
            report.coalesced = true;
            return Ok(report);
        }
        let _guard = DrainGuard(&coordinator.draining);

        let result = Self::drain_queue(coordinator, &mut report).await;
        report.remaining = coordinator.queue().size().await.unwrap_or(0);
        if result.is_ok() && report.remaining == 0 {
            coordinator.forget_settled_ids().await;
        }
        metrics::set_queue_depth(domain, report.remaining);
        metrics::record_drain(domain, report.replayed, report.discarded, report.stopped);
        result?;

        if report.replayed + report.discarded + report.corrupt > 0 || report.stopped {
            info!(
                replayed = report.replayed,
                discarded = report.discarded,
                corrupt = report.corrupt,
                stopped = report.stopped,
                remaining = report.remaining,
                "Queue drain finished"
            );
        }
        Ok(report)
    }

    async fn drain_queue(coordinator: &SyncCoordinator, report: &mut DrainReport) -> Result<(), SyncError> {
        let queue = coordinator.queue();
        let domain = coordinator.domain().to_string();

        loop {
            let head = match queue.peek_oldest().await {
                Ok(Some(head)) => head,
                Ok(None) => return Ok(()),
                Err(StorageError::Corruption { seq, reason }) => {
                    warn!(domain = %domain, seq, reason = %reason, "Dropping unreadable queue record");
                    queue.remove_oldest().await?;
                    metrics::record_queue_corruption(&domain);
                    report.corrupt += 1;
                    coordinator.emit(SyncEvent::CorruptRecordDropped {
                        domain: domain.clone(),
                        seq,
                        reason,
                    });
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let local_id = head.record.local_id.clone();
            let kind = head.record.kind;
            match coordinator.replay_record(head.record).await {
                ReplayStep::Acked | ReplayStep::Deduplicated => {
                    queue.remove_oldest().await?;
                    report.replayed += 1;
                }
                ReplayStep::Discarded(failure) => {
                    warn!(domain = %domain, local_id = %local_id, kind = %kind, error = %failure, "Discarding rejected queued mutation");
                    queue.remove_oldest().await?;
                    report.discarded += 1;
                    coordinator.emit(SyncEvent::Discarded {
                        domain: domain.clone(),
                        local_id,
                        kind,
                        failure,
                    });
                }
                ReplayStep::Retry(failure) => {
                    debug!(domain = %domain, local_id = %local_id, error = %failure, "Replay stopped at transient failure");
                    if let Err(e) = queue.record_attempt().await {
                        warn!(domain = %domain, error = %e, "Could not record replay attempt");
                    }
                    report.stopped = true;
                    return Ok(());
                }
            }
        }
    }

    /// Drain every registered domain, one after another.
    pub async fn drain_all(&self) -> Vec<Result<DrainReport, SyncError>> {
        let mut reports = Vec::with_capacity(self.coordinators.len());
        for domain in self.coordinators.keys() {
            reports.push(self.drain(domain).await);
        }
        reports
    }
}
