// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity data structure.
//!
//! An [`Entity`] is one domain record (project, article, list item). Its
//! fields are an opaque JSON object owned by the domain; the engine only
//! reads the handful of keys named by [`DomainRules`](crate::state::DomainRules).
//!
//! # Example
//!
//! ```
//! use optimistic_sync::Entity;
//! use serde_json::json;
//!
//! let draft = Entity::new(Entity::temporary_id(), json!({"title": "Write report"}));
//! assert!(draft.is_temporary());
//!
//! let saved = Entity::new("p-42", json!({"title": "Write report"}));
//! assert!(!saved.is_temporary());
//! assert_eq!(saved.field("title"), Some(&json!("Write report")));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix carried by client-assigned ids until the remote issues a real one.
pub const TEMP_ID_PREFIX: &str = "tmp-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Last local or remote touch (epoch millis)
    #[serde(default)]
    pub updated_at: i64,
}

impl Entity {
    /// Build an entity from a JSON payload. Non-object payloads are stored
    /// under a `value` key so no data is dropped.
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            fields: into_object(payload),
            updated_at: now_millis(),
        }
    }

    /// Fresh client-side id, unique per process run and across restarts.
    #[must_use]
    pub fn temporary_id() -> String {
        format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Shallow merge: keys in `patch` overwrite, a JSON `null` removes the key.
    pub fn merge(&mut self, patch: &Value) {
        if let Value::Object(patch) = patch {
            for (key, value) in patch {
                if value.is_null() {
                    self.fields.remove(key);
                } else {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
        self.updated_at = now_millis().max(self.updated_at);
    }
}

#[must_use]
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

fn into_object(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_temporary_ids_are_unique() {
        let a = Entity::temporary_id();
        let b = Entity::temporary_id();
        assert_ne!(a, b);
        assert!(is_temporary_id(&a));
    }

    #[test]
    fn test_merge_overwrites_and_removes() {
        let mut entity = Entity::new("e1", json!({"title": "A", "note": "x", "priority": false}));
        entity.merge(&json!({"title": "B", "note": null}));

        assert_eq!(entity.field("title"), Some(&json!("B")));
        assert!(entity.field("note").is_none());
        assert_eq!(entity.field("priority"), Some(&json!(false)));
    }

    #[test]
    fn test_merge_ignores_non_object_patch() {
        let mut entity = Entity::new("e1", json!({"title": "A"}));
        entity.merge(&json!("not an object"));
        assert_eq!(entity.field("title"), Some(&json!("A")));
    }

    #[test]
    fn test_scalar_payload_kept_under_value() {
        let entity = Entity::new("e1", json!(7));
        assert_eq!(entity.field("value"), Some(&json!(7)));
    }

    #[test]
    fn test_deserialize_without_optional_fields() {
        let entity: Entity = serde_json::from_value(json!({"id": "s1"})).unwrap();
        assert_eq!(entity.id, "s1");
        assert!(entity.fields.is_empty());
        assert_eq!(entity.updated_at, 0);
    }
}
