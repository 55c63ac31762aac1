// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation records and their lifecycle states.
//!
//! A [`MutationRecord`] is created when the user acts, is applied
//! optimistically, and then either acknowledged, queued, or rejected. The
//! same record is what the offline queue persists and replays.
//!
//! ```text
//! Pending → Sent → Acked
//!                → TransientFailed  (queued, optimistic state kept)
//!                → PermanentFailed  (rolled back, never retried)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::{now_millis, Entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Reorder,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reorder => "reorder",
        }
    }

    /// Parse the persisted form. `None` means the stored record is corrupt.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "reorder" => Some(Self::Reorder),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user mutation against one entity of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Entity id as known locally when the mutation was made (temporary for creates)
    pub local_id: String,
    pub domain: String,
    pub kind: OperationKind,
    pub payload: Value,
    /// Epoch millis
    pub created_at: i64,
    pub attempt_count: u32,
}

impl MutationRecord {
    pub fn new(domain: impl Into<String>, local_id: impl Into<String>, kind: OperationKind, payload: Value) -> Self {
        Self {
            local_id: local_id.into(),
            domain: domain.into(),
            kind,
            payload,
            created_at: now_millis(),
            attempt_count: 0,
        }
    }

    /// Create with a fresh temporary id. Read the id back from `local_id`.
    pub fn create(domain: impl Into<String>, payload: Value) -> Self {
        Self::new(domain, Entity::temporary_id(), OperationKind::Create, payload)
    }

    pub fn update(domain: impl Into<String>, id: impl Into<String>, patch: Value) -> Self {
        Self::new(domain, id, OperationKind::Update, patch)
    }

    pub fn delete(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(domain, id, OperationKind::Delete, Value::Null)
    }

    pub fn reorder(domain: impl Into<String>, id: impl Into<String>, position: usize) -> Self {
        Self::new(domain, id, OperationKind::Reorder, json!({ "position": position }))
    }

    /// Replace every reference to `old` (the target id and any payload string
    /// equal to it) with `new`. Returns whether anything changed.
    ///
    /// A create keeps its own `local_id`: it is the idempotency key the
    /// remote deduplicates on, so a resent create must carry it unchanged.
    pub fn rewrite_id(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        if self.local_id == old && self.kind != OperationKind::Create {
            self.local_id = new.to_string();
            changed = true;
        }
        changed |= rewrite_refs(&mut self.payload, old, new);
        changed
    }

    /// Target index of a reorder, if the payload carries one.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.payload.get("position").and_then(Value::as_u64).map(|p| p as usize)
    }
}

fn rewrite_refs(value: &mut Value, old: &str, new: &str) -> bool {
    match value {
        Value::String(s) if s == old => {
            *s = new.to_string();
            true
        }
        Value::Array(items) => items.iter_mut().fold(false, |acc, v| rewrite_refs(v, old, new) | acc),
        Value::Object(map) => map.values_mut().fold(false, |acc, v| rewrite_refs(v, old, new) | acc),
        _ => false,
    }
}

/// Lifecycle state of one in-flight mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Sent,
    Acked,
    TransientFailed,
    PermanentFailed,
}

impl MutationState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::TransientFailed | Self::PermanentFailed)
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Sent => write!(f, "Sent"),
            Self::Acked => write!(f, "Acked"),
            Self::TransientFailed => write!(f, "TransientFailed"),
            Self::PermanentFailed => write!(f, "PermanentFailed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::is_temporary_id;

    #[test]
    fn test_kind_roundtrip_through_persisted_form() {
        for kind in [OperationKind::Create, OperationKind::Update, OperationKind::Delete, OperationKind::Reorder] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("upsert"), None);
    }

    #[test]
    fn test_create_assigns_temporary_id() {
        let record = MutationRecord::create("projects", json!({"title": "New"}));
        assert!(is_temporary_id(&record.local_id));
        assert_eq!(record.kind, OperationKind::Create);
        assert_eq!(record.attempt_count, 0);
    }

    #[test]
    fn test_reorder_position() {
        let record = MutationRecord::reorder("lists", "i-1", 3);
        assert_eq!(record.position(), Some(3));
        assert_eq!(MutationRecord::delete("lists", "i-1").position(), None);
    }

    #[test]
    fn test_rewrite_id_touches_target_and_payload_refs() {
        let mut record = MutationRecord::update("lists", "tmp-1", json!({"parent": "tmp-1", "tags": ["tmp-1", "x"]}));
        assert!(record.rewrite_id("tmp-1", "s1"));
        assert_eq!(record.local_id, "s1");
        assert_eq!(record.payload, json!({"parent": "s1", "tags": ["s1", "x"]}));

        assert!(!record.rewrite_id("tmp-1", "s1"));
    }

    #[test]
    fn test_rewrite_id_keeps_create_idempotency_key() {
        let mut create = MutationRecord::create("lists", json!({"title": "x"}));
        let temp = create.local_id.clone();
        assert!(!create.rewrite_id(&temp, "s1"));
        assert_eq!(create.local_id, temp);

        let mut child = MutationRecord::create("lists", json!({"parent": "tmp-1"}));
        assert!(child.rewrite_id("tmp-1", "s1"));
        assert_eq!(child.payload["parent"], "s1");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MutationState::Pending.is_terminal());
        assert!(!MutationState::Sent.is_terminal());
        assert!(MutationState::Acked.is_terminal());
        assert!(MutationState::TransientFailed.is_terminal());
        assert!(MutationState::PermanentFailed.is_terminal());
        assert_eq!(MutationState::TransientFailed.to_string(), "TransientFailed");
    }
}
