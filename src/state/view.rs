// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Derived views over a domain's canonical collection.
//!
//! Views are recomputed from the canonical collection on every read and hold
//! no state of their own. The sort order is:
//!
//! 1. priority flag set first
//! 2. domain status rank, ascending
//! 3. most recently touched first
//! 4. id, ascending (keeps ties deterministic)

use std::cmp::Ordering;

use serde_json::Value;

use crate::entity::Entity;

/// Domain-specific reading of entity fields.
///
/// Every method has a neutral default, so a domain only overrides what it
/// actually orders or filters by.
pub trait DomainRules: Send + Sync {
    fn is_priority(&self, _entity: &Entity) -> bool {
        false
    }

    /// Lower ranks sort first.
    fn status_rank(&self, _entity: &Entity) -> u32 {
        0
    }

    fn is_active(&self, _entity: &Entity) -> bool {
        true
    }

    fn touched_at(&self, entity: &Entity) -> i64 {
        entity.updated_at
    }

    /// Authoritative position in the canonical order, when the domain keeps one.
    fn position_of(&self, _entity: &Entity) -> Option<usize> {
        None
    }
}

/// Rules driven by well-known field names. Covers projects (status + priority),
/// reading lists (archived flag as status) and ordered lists (position).
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub priority_field: String,
    pub status_field: String,
    /// Statuses in sort order; unknown statuses sort after all of these
    pub status_order: Vec<String>,
    /// Statuses excluded from the active view
    pub inactive_statuses: Vec<String>,
    pub position_field: Option<String>,
    /// Epoch-millis field preferred over `updated_at` for recency
    pub touched_field: Option<String>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            priority_field: "priority".to_string(),
            status_field: "status".to_string(),
            status_order: Vec::new(),
            inactive_statuses: vec!["completed".to_string(), "archived".to_string()],
            position_field: Some("position".to_string()),
            touched_field: None,
        }
    }
}

impl FieldRules {
    #[must_use]
    pub fn with_status_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status_order = order.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_touched_field(mut self, field: impl Into<String>) -> Self {
        self.touched_field = Some(field.into());
        self
    }

    fn status<'a>(&self, entity: &'a Entity) -> Option<&'a str> {
        entity.field(&self.status_field).and_then(Value::as_str)
    }
}

impl DomainRules for FieldRules {
    fn is_priority(&self, entity: &Entity) -> bool {
        entity.field(&self.priority_field).and_then(Value::as_bool).unwrap_or(false)
    }

    fn status_rank(&self, entity: &Entity) -> u32 {
        let unknown = self.status_order.len() as u32;
        self.status(entity)
            .and_then(|s| self.status_order.iter().position(|o| o == s))
            .map_or(unknown, |p| p as u32)
    }

    fn is_active(&self, entity: &Entity) -> bool {
        self.status(entity)
            .map_or(true, |s| !self.inactive_statuses.iter().any(|i| i == s))
    }

    fn touched_at(&self, entity: &Entity) -> i64 {
        self.touched_field
            .as_deref()
            .and_then(|f| entity.field(f))
            .and_then(Value::as_i64)
            .unwrap_or(entity.updated_at)
    }

    fn position_of(&self, entity: &Entity) -> Option<usize> {
        self.position_field
            .as_deref()
            .and_then(|f| entity.field(f))
            .and_then(Value::as_u64)
            .map(|p| p as usize)
    }
}

/// Which projection of the collection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Canonical order, everything
    All,
    /// Canonical order, active only
    Active,
    /// Everything, sorted priority-first
    Prioritized,
    /// Active only, sorted priority-first
    ActivePrioritized,
}

pub fn compare(rules: &dyn DomainRules, a: &Entity, b: &Entity) -> Ordering {
    rules
        .is_priority(b)
        .cmp(&rules.is_priority(a))
        .then_with(|| rules.status_rank(a).cmp(&rules.status_rank(b)))
        .then_with(|| rules.touched_at(b).cmp(&rules.touched_at(a)))
        .then_with(|| a.id.cmp(&b.id))
}

#[must_use]
pub fn project(entities: &[Entity], rules: &dyn DomainRules, view: View) -> Vec<Entity> {
    let active_only = matches!(view, View::Active | View::ActivePrioritized);
    let mut out: Vec<Entity> = entities
        .iter()
        .filter(|e| !active_only || rules.is_active(e))
        .cloned()
        .collect();

    if matches!(view, View::Prioritized | View::ActivePrioritized) {
        out.sort_by(|a, b| compare(rules, a, b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, fields: Value, updated_at: i64) -> Entity {
        let mut e = Entity::new(id, fields);
        e.updated_at = updated_at;
        e
    }

    fn project_rules() -> FieldRules {
        FieldRules::default().with_status_order(["active", "upcoming", "dormant", "completed"])
    }

    #[test]
    fn test_priority_then_status_then_recency_then_id() {
        let rules = project_rules();
        let entities = vec![
            entity("d", json!({"status": "dormant"}), 500),
            entity("a", json!({"status": "active"}), 100),
            entity("b", json!({"status": "active"}), 300),
            entity("p", json!({"status": "completed", "priority": true}), 1),
            entity("c", json!({"status": "active"}), 300),
        ];

        let ids: Vec<String> = project(&entities, &rules, View::Prioritized).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["p", "b", "c", "a", "d"]);
    }

    #[test]
    fn test_active_view_keeps_canonical_order() {
        let rules = project_rules();
        let entities = vec![
            entity("z", json!({"status": "active"}), 1),
            entity("done", json!({"status": "completed"}), 9),
            entity("y", json!({}), 2),
        ];

        let ids: Vec<String> = project(&entities, &rules, View::Active).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["z", "y"]);
    }

    #[test]
    fn test_unknown_status_sorts_last() {
        let rules = project_rules();
        let a = entity("a", json!({"status": "mystery"}), 10);
        let b = entity("b", json!({"status": "dormant"}), 1);
        assert_eq!(compare(&rules, &b, &a), Ordering::Less);
    }

    #[test]
    fn test_touched_field_overrides_updated_at() {
        let rules = FieldRules::default().with_touched_field("last_active_at");
        let a = entity("a", json!({"last_active_at": 50}), 900);
        let b = entity("b", json!({"last_active_at": 60}), 100);
        assert_eq!(compare(&rules, &a, &b), Ordering::Greater);
    }

    #[test]
    fn test_position_field() {
        let rules = FieldRules::default();
        assert_eq!(rules.position_of(&entity("a", json!({"position": 4}), 0)), Some(4));
        assert_eq!(rules.position_of(&entity("a", json!({}), 0)), None);
    }
}
