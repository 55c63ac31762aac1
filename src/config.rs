// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use optimistic_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.send_timeout_ms, 10_000);
//! assert!(config.ambiguous_errors_transient);
//!
//! // Durable config
//! let config = SyncConfig {
//!     queue_url: Some("sqlite://sync-queue.db?mode=rwc".into()),
//!     cache_url: Some("sqlite://sync-cache.db?mode=rwc".into()),
//!     queue_max_records: Some(5_000),
//!     ..Default::default()
//! };
//! assert_eq!(config.queue_max_records, Some(5_000));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::ClassificationPolicy;
use crate::resilience::circuit_breaker::CircuitConfig;

/// Configuration for one domain's sync engine.
///
/// All fields have defaults. Hosts that need durability across restarts set
/// `queue_url` and `cache_url`; without them the in-memory stores are used.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on a single remote call before it counts as a transient failure
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// SQLite URL for the offline queue (e.g. "sqlite://queue.db?mode=rwc")
    #[serde(default)]
    pub queue_url: Option<String>,

    /// SQLite URL for the persistent entity cache
    #[serde(default)]
    pub cache_url: Option<String>,

    /// Max queued mutations before enqueue is refused (None = unbounded)
    #[serde(default)]
    pub queue_max_records: Option<u64>,

    /// How to classify remote errors that carry no status and no category
    #[serde(default = "default_ambiguous_errors_transient")]
    pub ambiguous_errors_transient: bool,

    /// Circuit breaker: consecutive transient failures before the circuit opens
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_success_threshold")]
    pub circuit_success_threshold: u32,
    #[serde(default = "default_circuit_recovery_ms")]
    pub circuit_recovery_ms: u64,

    /// Capacity of the sync event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_send_timeout_ms() -> u64 { 10_000 }
fn default_ambiguous_errors_transient() -> bool { true }
fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_success_threshold() -> u32 { 2 }
fn default_circuit_recovery_ms() -> u64 { 30_000 }
fn default_event_buffer() -> usize { 256 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            queue_url: None,
            cache_url: None,
            queue_max_records: None,
            ambiguous_errors_transient: default_ambiguous_errors_transient(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_success_threshold: default_circuit_success_threshold(),
            circuit_recovery_ms: default_circuit_recovery_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[must_use]
    pub fn classification_policy(&self) -> ClassificationPolicy {
        ClassificationPolicy {
            ambiguous_is_transient: self.ambiguous_errors_transient,
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            success_threshold: self.circuit_success_threshold,
            recovery_timeout: Duration::from_millis(self.circuit_recovery_ms),
        }
    }
}
