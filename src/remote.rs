// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote service contract.
//!
//! The engine talks to the backend only through [`RemoteService`]. Adapters
//! (HTTP, gRPC, a local database) translate their errors into
//! [`RemoteFailure`]; the engine classifies them, never the adapter.
//!
//! [`InMemoryRemote`] is a complete in-process backend with scriptable
//! failures, for tests and local-only hosts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::entity::Entity;
use crate::error::RemoteFailure;

#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create an entity. `local_id` is an idempotency key: sending the same
    /// key twice must return the entity created the first time.
    async fn create(&self, domain: &str, local_id: &str, payload: &Value) -> Result<Entity, RemoteFailure>;

    /// Patch an entity and return its authoritative state. Reorders arrive
    /// here as `{"position": n}` patches.
    async fn update(&self, domain: &str, id: &str, payload: &Value) -> Result<Entity, RemoteFailure>;

    async fn delete(&self, domain: &str, id: &str) -> Result<(), RemoteFailure>;

    async fn list(&self, domain: &str) -> Result<Vec<Entity>, RemoteFailure>;
}

/// One call observed by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub domain: String,
    pub id: String,
    pub payload: Value,
}

#[derive(Default)]
struct RemoteState {
    domains: HashMap<String, Vec<Entity>>,
    /// (domain, local_id) -> issued id
    idempotency: HashMap<(String, String), String>,
    scripted: VecDeque<RemoteFailure>,
    unreachable: Option<RemoteFailure>,
    calls: Vec<RemoteCall>,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
}

/// In-process backend that issues `s1`, `s2`, ... ids.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    next_id: AtomicU64,
    latency: Option<Duration>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            next_id: AtomicU64::new(1),
            latency: None,
        }
    }

    /// Every call sleeps this long before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed server-side data without going through the call log.
    pub fn seed(&self, domain: &str, entities: Vec<Entity>) {
        self.state.lock().domains.insert(domain.to_string(), entities);
    }

    /// Fail the next call with `failure`. Scripted failures are consumed in order.
    pub fn fail_next(&self, failure: RemoteFailure) {
        self.state.lock().scripted.push_back(failure);
    }

    /// Fail every call with a network error until called with `false`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable.then(|| RemoteFailure::network("connection refused"));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn entities(&self, domain: &str) -> Vec<Entity> {
        self.state.lock().domains.get(domain).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, domain: &str, id: &str) -> Option<Entity> {
        self.state.lock().domains.get(domain)?.iter().find(|e| e.id == id).cloned()
    }

    /// Highest number of overlapping calls seen against a single entity id.
    #[must_use]
    pub fn max_in_flight_per_entity(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Record the call and decide whether it fails. The in-flight counter is
    /// held for the whole simulated latency.
    async fn enter(&self, op: &'static str, domain: &str, id: &str, payload: &Value) -> Result<InFlight<'_>, RemoteFailure> {
        {
            let mut state = self.state.lock();
            state.calls.push(RemoteCall {
                op,
                domain: domain.to_string(),
                id: id.to_string(),
                payload: payload.clone(),
            });
            let count = state.in_flight.entry(id.to_string()).or_default();
            *count += 1;
            let count = *count;
            state.max_in_flight = state.max_in_flight.max(count);
        }
        let guard = InFlight { remote: self, id: id.to_string() };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = state.scripted.pop_front() {
            return Err(failure);
        }
        if let Some(failure) = state.unreachable.clone() {
            return Err(failure);
        }
        trace!(op, domain, id, "Remote call accepted");
        Ok(guard)
    }
}

struct InFlight<'a> {
    remote: &'a InMemoryRemote,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.remote.state.lock();
        if let Some(count) = state.in_flight.get_mut(&self.id) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn create(&self, domain: &str, local_id: &str, payload: &Value) -> Result<Entity, RemoteFailure> {
        let _call = self.enter("create", domain, local_id, payload).await?;
        let mut state = self.state.lock();
        let key = (domain.to_string(), local_id.to_string());

        if let Some(existing) = state.idempotency.get(&key).cloned() {
            if let Some(entity) = state.domains.get(domain).and_then(|d| d.iter().find(|e| e.id == existing)) {
                return Ok(entity.clone());
            }
        }

        let id = format!("s{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let entity = Entity::new(id.clone(), payload.clone());
        state.idempotency.insert(key, id);
        state.domains.entry(domain.to_string()).or_default().push(entity.clone());
        Ok(entity)
    }

    async fn update(&self, domain: &str, id: &str, payload: &Value) -> Result<Entity, RemoteFailure> {
        let _call = self.enter("update", domain, id, payload).await?;
        let mut state = self.state.lock();
        let entities = state.domains.entry(domain.to_string()).or_default();
        let Some(idx) = entities.iter().position(|e| e.id == id) else {
            return Err(RemoteFailure::status(404, format!("{domain}/{id} not found")));
        };

        let mut entity = entities.remove(idx);
        entity.merge(payload);
        let target = payload
            .get("position")
            .and_then(Value::as_u64)
            .map_or(idx, |p| p as usize)
            .min(entities.len());
        entities.insert(target, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, domain: &str, id: &str) -> Result<(), RemoteFailure> {
        let _call = self.enter("delete", domain, id, &Value::Null).await?;
        let mut state = self.state.lock();
        let entities = state.domains.entry(domain.to_string()).or_default();
        let before = entities.len();
        entities.retain(|e| e.id != id);
        if entities.len() == before {
            return Err(RemoteFailure::status(404, format!("{domain}/{id} not found")));
        }
        Ok(())
    }

    async fn list(&self, domain: &str) -> Result<Vec<Entity>, RemoteFailure> {
        let _call = self.enter("list", domain, "", &Value::Null).await?;
        Ok(self.entities(domain))
    }
}
