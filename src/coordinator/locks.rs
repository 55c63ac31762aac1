// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity mutation locks.
//!
//! At most one mutation per entity is `Sent` at a time. Each entity id maps
//! to a slot holding a fair `tokio::sync::Mutex`; later mutations queue on it
//! in submission order. When a create is acknowledged, the server id is
//! pointed at the same slot as the temporary id, so mutations already
//! waiting under the old id keep their place ahead of new ones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct EntitySlot {
    lock: Arc<Mutex<()>>,
    /// Mutations registered against this entity and not yet resolved
    pending: AtomicUsize,
}

/// Registration of one mutation against an entity, taken before its
/// optimistic apply so acknowledgments can see it is waiting.
pub(crate) struct EntityTicket {
    slot: Arc<EntitySlot>,
}

impl EntityTicket {
    /// Wait for the entity's turn. Held until the mutation resolves.
    pub async fn acquire(self) -> EntityPermit {
        let held = self.slot.lock.clone().lock_owned().await;
        EntityPermit { ticket: self, _held: held }
    }
}

impl Drop for EntityTicket {
    fn drop(&mut self) {
        self.slot.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct EntityPermit {
    // Released before the lock so a successor never sees itself counted twice
    ticket: EntityTicket,
    _held: OwnedMutexGuard<()>,
}

impl EntityPermit {
    /// Whether later mutations of the same entity are already applied locally.
    pub fn has_successors(&self) -> bool {
        self.ticket.slot.pending.load(Ordering::Acquire) > 1
    }
}

#[derive(Default)]
pub(crate) struct EntityLocks {
    slots: DashMap<String, Arc<EntitySlot>>,
}

impl EntityLocks {
    pub fn register(&self, id: &str) -> EntityTicket {
        // Count under the shard lock so prune never drops a slot being joined
        let entry = self.slots.entry(id.to_string()).or_default();
        entry.pending.fetch_add(1, Ordering::AcqRel);
        EntityTicket { slot: Arc::clone(&entry) }
    }

    /// Make `new_id` share `old_id`'s slot. Called while `old_id` is held.
    pub fn alias(&self, old_id: &str, new_id: &str) {
        if let Some(slot) = self.slots.get(old_id).map(|s| Arc::clone(&s)) {
            self.slots.insert(new_id.to_string(), slot);
        }
    }

    /// Drop slots nobody is registered on.
    pub fn prune(&self) {
        self.slots.retain(|_, slot| slot.pending.load(Ordering::Acquire) > 0);
    }

    /// No mutation holds or awaits any entity.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.pending.load(Ordering::Acquire) == 0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entity_serializes_in_order() {
        let locks = Arc::new(EntityLocks::default());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = locks.register("e1").acquire().await;
        let mut handles = Vec::new();
        for n in 0..3 {
            let ticket = locks.register("e1");
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = ticket.acquire().await;
                order.lock().push(n);
            }));
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(order.lock().is_empty());
        assert!(first.has_successors());
        drop(first);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_alias_shares_slot() {
        let locks = EntityLocks::default();
        let held = locks.register("tmp-1").acquire().await;
        locks.alias("tmp-1", "s1");

        let waiting = locks.register("s1");
        assert!(held.has_successors());

        drop(held);
        let permit = waiting.acquire().await;
        assert!(!permit.has_successors());
    }

    #[tokio::test]
    async fn test_prune_keeps_registered_slots() {
        let locks = EntityLocks::default();
        let kept = locks.register("a");
        drop(locks.register("b"));

        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(kept);
        locks.prune();
        assert_eq!(locks.len(), 0);
    }
}
