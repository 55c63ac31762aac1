// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end offline/online scenarios against the in-process remote.
//!
//! Run with: `cargo test --test scenarios`

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{contents, Harness};
use optimistic_sync::{
    is_temporary_id, Entity, InMemoryRemote, MutationRecord, RemoteFailure,
    RemoteService, Resolution, SyncError, SyncEvent,
};

// ========== Temporary Id Tests ==========

#[tokio::test]
async fn offline_create_is_renamed_everywhere_after_reconnect() {
    let h = Harness::new("notes", false);

    let Resolution::Queued { id: temp } = h.coordinator.create(json!({"title": "draft"})).await.unwrap() else {
        panic!("offline create must queue");
    };
    assert!(is_temporary_id(&temp));
    h.coordinator.update(&temp, json!({"title": "final"})).await.unwrap();
    assert_eq!(h.queued().await, 2);
    assert_eq!(h.coordinator.store().get(&temp).unwrap().field("title"), Some(&json!("final")));

    h.set_online(true);
    let report = h.replayer.drain("notes").await.unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.remaining, 0);

    let ids: Vec<String> = h.coordinator.store().entities().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["s1".to_string()]);
    assert_eq!(h.cached_ids().await, vec!["s1".to_string()]);
    // With the queue empty the temporary id is no longer tracked
    assert_eq!(h.coordinator.resolve_id(&temp), temp);

    // The queued update was rewritten to the server id before it was sent
    let calls = h.remote.calls();
    assert_eq!(calls[1].op, "update");
    assert_eq!(calls[1].id, "s1");
    assert_eq!(h.remote.get("notes", "s1").unwrap().field("title"), Some(&json!("final")));
}

// ========== Ordering Tests ==========

#[tokio::test]
async fn double_edit_offline_replays_in_order() {
    let h = Harness::new("tasks", false);
    h.seed(vec![Entity::new("t1", json!({"title": "original"}))]);

    h.coordinator.update("t1", json!({"title": "A"})).await.unwrap();
    h.coordinator.update("t1", json!({"title": "B"})).await.unwrap();
    assert_eq!(h.coordinator.store().get("t1").unwrap().field("title"), Some(&json!("B")));

    h.set_online(true);
    h.replayer.drain("tasks").await.unwrap();

    let titles: Vec<_> = h.remote.calls().iter().map(|c| c.payload["title"].clone()).collect();
    assert_eq!(titles, vec![json!("A"), json!("B")]);
    assert_eq!(h.remote.get("tasks", "t1").unwrap().field("title"), Some(&json!("B")));
    assert_eq!(h.coordinator.store().get("t1").unwrap().field("title"), Some(&json!("B")));
}

#[tokio::test]
async fn live_mutation_waits_behind_nonempty_queue() {
    let h = Harness::new("tasks", false);
    h.seed(vec![Entity::new("t1", json!({"n": 0}))]);
    h.coordinator.update("t1", json!({"n": 1})).await.unwrap();

    h.set_online(true);
    // Online, but the queue still holds n=1, so n=2 must not overtake it
    let resolution = h.coordinator.update("t1", json!({"n": 2})).await.unwrap();
    assert!(matches!(resolution, Resolution::Queued { .. }));
    assert!(h.remote.calls().is_empty());

    h.replayer.drain("tasks").await.unwrap();
    assert_eq!(h.remote.get("tasks", "t1").unwrap().field("n"), Some(&json!(2)));
}

#[tokio::test]
async fn transient_failure_stops_drain_and_keeps_order() {
    let h = Harness::new("tasks", false);
    h.seed(vec![Entity::new("t1", json!({})), Entity::new("t2", json!({}))]);
    h.coordinator.update("t1", json!({"v": 1})).await.unwrap();
    h.coordinator.update("t2", json!({"v": 2})).await.unwrap();

    h.set_online(true);
    h.remote.fail_next(RemoteFailure::status(503, "maintenance"));
    let report = h.replayer.drain("tasks").await.unwrap();
    assert!(report.stopped);
    assert_eq!(report.remaining, 2);
    assert_eq!(h.remote.calls().len(), 1);

    let report = h.replayer.drain("tasks").await.unwrap();
    assert_eq!(report.replayed, 2);
    let ids: Vec<_> = h.remote.calls().iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec!["t1", "t1", "t2"]);
}

// ========== Rejection Tests ==========

#[tokio::test]
async fn rejected_delete_restores_exact_state() {
    let h = Harness::new("lists", true);
    h.seed(vec![
        Entity::new("l1", json!({"title": "groceries"})),
        Entity::new("l2", json!({"title": "chores"})),
        Entity::new("l3", json!({"title": "books"})),
    ]);
    let before = h.coordinator.store().entities();
    let mut events = h.coordinator.events();

    h.remote.fail_next(RemoteFailure::status(403, "forbidden"));
    let err = h.coordinator.delete("l2").await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected { ref local_id, .. } if local_id == "l2"));

    assert_eq!(*h.coordinator.store().entities(), *before);
    assert_eq!(h.queued().await, 0);
    assert!(matches!(events.recv().await.unwrap(), SyncEvent::Rejected { .. }));
}

#[tokio::test]
async fn rejected_queued_create_drops_its_followers() {
    let h = Harness::new("lists", false);
    let Resolution::Queued { id: temp } = h.coordinator.create(json!({})).await.unwrap() else {
        panic!("offline create must queue");
    };
    h.coordinator.update(&temp, json!({"title": "late"})).await.unwrap();
    h.coordinator.create(json!({"title": "fine"})).await.unwrap();

    h.set_online(true);
    h.remote.fail_next(RemoteFailure::status(422, "title required"));
    let report = h.replayer.drain("lists").await.unwrap();

    assert_eq!(report.discarded, 2);
    assert_eq!(report.replayed, 1);
    assert!(!h.coordinator.store().contains(&temp));
    assert_eq!(contents(&h.remote.entities("lists")), contents(&h.coordinator.store().entities()));
}

// ========== Idempotency Tests ==========

#[tokio::test]
async fn replayed_create_that_already_landed_is_not_duplicated() {
    let h = Harness::new("notes", false);
    let record = MutationRecord::create("notes", json!({"title": "once"}));
    h.coordinator.submit(record.clone()).await.unwrap();

    // The first attempt reached the server but its response never came back
    let landed = h.remote.create("notes", &record.local_id, &record.payload).await.unwrap();

    h.set_online(true);
    h.replayer.drain("notes").await.unwrap();

    assert_eq!(h.remote.entities("notes").len(), 1);
    let local = h.coordinator.store().entities();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, landed.id);
}

// ========== Concurrency Tests ==========

#[tokio::test]
async fn at_most_one_request_in_flight_per_entity() {
    let remote = InMemoryRemote::new().with_latency(Duration::from_millis(10));
    let h = Harness::with_remote("tasks", true, remote);
    h.seed(vec![Entity::new("t1", json!({"n": 0})), Entity::new("t2", json!({"n": 0}))]);

    let mut handles = Vec::new();
    for n in 1..=5 {
        for id in ["t1", "t2"] {
            let coordinator = Arc::clone(&h.coordinator);
            handles.push(tokio::spawn(async move { coordinator.update(id, json!({"n": n})).await }));
        }
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap().unwrap(), Resolution::Acked { .. }));
    }

    assert_eq!(h.remote.max_in_flight_per_entity(), 1);
    assert_eq!(h.remote.calls().len(), 10);
}
