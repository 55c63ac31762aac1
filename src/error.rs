// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy and remote failure classification.
//!
//! Remote calls fail with a [`RemoteFailure`]: an optional status code, a
//! coarse [`FailureCategory`] and a message. [`classify`] turns that into a
//! [`FailureClass`] using explicit rules only. Whether the device currently
//! thinks it is online plays no part in the decision.
//!
//! | Failure                                     | Class                  |
//! |---------------------------------------------|------------------------|
//! | `Network`, `Timeout`, `Unavailable`         | Transient              |
//! | status 408, 425, 429, 5xx                   | Transient              |
//! | any other 4xx                               | Permanent              |
//! | `Rejected` (explicit domain rejection)      | Permanent              |
//! | no status, `Unknown` category               | policy (default Transient) |
//!
//! # Example
//!
//! ```
//! use optimistic_sync::{classify, ClassificationPolicy, FailureClass, RemoteFailure};
//!
//! let policy = ClassificationPolicy::default();
//! assert_eq!(classify(&RemoteFailure::status(503, "maintenance"), &policy), FailureClass::Transient);
//! assert_eq!(classify(&RemoteFailure::status(409, "conflict"), &policy), FailureClass::Permanent);
//! assert_eq!(classify(&RemoteFailure::unknown("socket hang up"), &policy), FailureClass::Transient);
//! ```

use thiserror::Error;

use crate::storage::traits::StorageError;

/// Coarse category of a remote failure, set by the transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Connection refused, DNS failure, socket reset
    Network,
    /// No response within the send bound
    Timeout,
    /// Server reachable but not serving (maintenance, overload)
    Unavailable,
    /// The remote understood the request and refused it
    Rejected,
    /// Error carried only an HTTP-style status
    Status,
    /// Nothing usable to classify on
    Unknown,
}

/// A failed remote call as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "remote failure ({:?}{}): {}",
    .category,
    .status.map(|s| format!(", status {s}")).unwrap_or_default(),
    .message
)]
pub struct RemoteFailure {
    pub status: Option<u16>,
    pub category: FailureCategory,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self { status: None, category, message: message.into() }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), category: FailureCategory::Status, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Rejected, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Unknown, message)
    }
}

/// Outcome class that drives the mutation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retryable infrastructure failure: keep optimistic state, queue for replay
    Transient,
    /// Definitive rejection of the mutation's content: roll back, never retry
    Permanent,
}

/// Defaults applied where the failure itself is not decisive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationPolicy {
    pub ambiguous_is_transient: bool,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self { ambiguous_is_transient: true }
    }
}

/// Classify a remote failure. Pure; see the module table for the rules.
#[must_use]
pub fn classify(failure: &RemoteFailure, policy: &ClassificationPolicy) -> FailureClass {
    match failure.category {
        FailureCategory::Network | FailureCategory::Timeout | FailureCategory::Unavailable => {
            return FailureClass::Transient;
        }
        FailureCategory::Rejected => return FailureClass::Permanent,
        FailureCategory::Status | FailureCategory::Unknown => {}
    }

    match failure.status {
        Some(408 | 425 | 429) => FailureClass::Transient,
        Some(s) if (500..600).contains(&s) => FailureClass::Transient,
        Some(s) if (400..500).contains(&s) => FailureClass::Permanent,
        // 1xx/2xx/3xx reported as an error is a transport oddity, not a verdict
        Some(_) | None => {
            if policy.ambiguous_is_transient {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            }
        }
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote rejected the mutation; local state has been rolled back
    #[error("mutation {local_id} rejected by remote: {failure}")]
    Rejected {
        local_id: String,
        failure: RemoteFailure,
    },

    /// The mutation could not be sent nor durably queued
    #[error("could not queue mutation {local_id}: {source}")]
    QueueUnavailable {
        local_id: String,
        #[source]
        source: StorageError,
    },

    /// Domain has no registered coordinator
    #[error("unknown domain '{0}'")]
    UnknownDomain(String),

    /// Remote fetch failed (refresh path)
    #[error("remote fetch failed: {0}")]
    Remote(#[from] RemoteFailure),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
