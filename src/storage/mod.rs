// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistence: the entity cache and the offline queue.
//!
//! - [`traits`]: [`PersistentCache`](traits::PersistentCache) and [`OfflineQueue`](traits::OfflineQueue)
//! - [`memory`]: in-process implementations for tests and ephemeral hosts
//! - [`sql`]: SQLite implementations that survive restarts

pub mod memory;
pub mod sql;
pub mod traits;
