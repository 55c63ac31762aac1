// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade; the host application installs the
//! exporter (Prometheus, OTEL, or nothing at all).
//!
//! # Metric Naming Convention
//! - `optimistic_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `domain`: projects, articles, lists, ...
//! - `kind`: create, update, delete, reorder
//! - `outcome`: acked, queued, rejected, discarded

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record the terminal state of one mutation attempt
pub fn record_mutation(domain: &str, kind: &str, outcome: &str) {
    counter!(
        "optimistic_sync_mutations_total",
        "domain" => domain.to_string(),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_remote_latency(domain: &str, kind: &str, duration: Duration) {
    histogram!(
        "optimistic_sync_remote_seconds",
        "domain" => domain.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a remote call that hit the send timeout
pub fn record_timeout(domain: &str) {
    counter!(
        "optimistic_sync_timeouts_total",
        "domain" => domain.to_string()
    )
    .increment(1);
}

/// Set current offline queue depth
pub fn set_queue_depth(domain: &str, depth: u64) {
    gauge!(
        "optimistic_sync_queue_depth",
        "domain" => domain.to_string()
    )
    .set(depth as f64);
}

/// Record a swallowed cache failure
pub fn record_cache_error(domain: &str, operation: &str) {
    counter!(
        "optimistic_sync_cache_errors_total",
        "domain" => domain.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a queue record dropped because it could not be decoded
pub fn record_queue_corruption(domain: &str) {
    counter!(
        "optimistic_sync_queue_corruption_total",
        "domain" => domain.to_string()
    )
    .increment(1);
}

/// Record the result of one queue drain
pub fn record_drain(domain: &str, replayed: usize, discarded: usize, stopped: bool) {
    counter!("optimistic_sync_replayed_total", "domain" => domain.to_string()).increment(replayed as u64);
    counter!("optimistic_sync_discarded_total", "domain" => domain.to_string()).increment(discarded as u64);
    if stopped {
        counter!("optimistic_sync_drain_stopped_total", "domain" => domain.to_string()).increment(1);
    }
}

/// Set connectivity (1 = online, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("optimistic_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "optimistic_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
