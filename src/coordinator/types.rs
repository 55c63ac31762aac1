// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use crate::entity::Entity;
use crate::error::RemoteFailure;
use crate::mutation::{MutationRecord, MutationState, OperationKind};
use crate::state::{LocalStateStore, Snapshot};

/// What a submitted mutation resolved to, from the caller's point of view.
///
/// A permanent rejection is not a resolution: it comes back as
/// [`SyncError::Rejected`](crate::SyncError::Rejected) after the rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The remote acknowledged it. `id` is the entity's server id.
    Acked { id: String },
    /// Kept optimistically and persisted to the offline queue. `id` is the
    /// entity's local id (temporary for creates).
    Queued { id: String },
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acked { id } => write!(f, "Acked({})", id),
            Self::Queued { id } => write!(f, "Queued({})", id),
        }
    }
}

/// Classified result of one remote send.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Server accepted; carries the authoritative entity (none for deletes)
    Acked(Option<Entity>),
    TransientFailed(RemoteFailure),
    PermanentFailed(RemoteFailure),
}

impl SendOutcome {
    #[must_use]
    pub fn state(&self) -> MutationState {
        match self {
            Self::Acked(_) => MutationState::Acked,
            Self::TransientFailed(_) => MutationState::TransientFailed,
            Self::PermanentFailed(_) => MutationState::PermanentFailed,
        }
    }
}

/// Non-blocking notifications for UI layers (toasts, badges, sync indicators).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Acked {
        domain: String,
        local_id: String,
        id: String,
    },
    Queued {
        domain: String,
        local_id: String,
        kind: OperationKind,
    },
    /// Live mutation rejected and rolled back
    Rejected {
        domain: String,
        local_id: String,
        kind: OperationKind,
        failure: RemoteFailure,
    },
    /// Queued mutation rejected during replay and dropped
    Discarded {
        domain: String,
        local_id: String,
        kind: OperationKind,
        failure: RemoteFailure,
    },
    /// Unreadable queue record dropped during replay
    CorruptRecordDropped {
        domain: String,
        seq: u64,
        reason: String,
    },
}

/// Result of one replayed queue record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplayStep {
    Acked,
    /// Create already acknowledged earlier in this process
    Deduplicated,
    Discarded(RemoteFailure),
    Retry(RemoteFailure),
}

/// One in-flight mutation. Owns the rollback snapshot until resolution;
/// taking the snapshot out makes a second rollback a no-op.
pub(crate) struct PendingMutation {
    pub record: MutationRecord,
    pub state: MutationState,
    /// Entity id the optimistic apply used
    applied_id: String,
    snapshot: Option<Snapshot>,
}

impl PendingMutation {
    pub fn new(record: MutationRecord, snapshot: Snapshot) -> Self {
        Self {
            applied_id: record.local_id.clone(),
            record,
            state: MutationState::Pending,
            snapshot: Some(snapshot),
        }
    }

    /// Mark resolved without rollback; the snapshot is dropped.
    pub fn resolve(&mut self, state: MutationState) {
        self.state = state;
        self.snapshot = None;
    }

    /// Undo the optimistic apply. Returns whether anything was restored.
    pub fn rollback(&mut self, store: &LocalStateStore) -> bool {
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };
        store.revert(&snapshot, &self.applied_id, &self.record.local_id);
        self.state = MutationState::PermanentFailed;
        true
    }
}
