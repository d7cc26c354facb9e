//! Stable integer handles for debuggee values.
//!
//! The tracker never owns a value: the forward map holds `Weak` references and
//! the reverse map is keyed by allocation address. Once the debuggee drops a
//! value, [`ValueTracker::reclaim`] sweeps its handle (together with its path
//! and frame id) out of every table; looking the id up afterwards yields
//! `None`, which the protocol layer reports as an empty result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::runtime::{DebugValue, ValueRef};

/// Handle id `0` means "no children" on the wire and is never assigned.
pub const NO_CHILDREN: u64 = 0;

#[derive(Default)]
struct Tables {
    by_id: HashMap<u64, Weak<dyn DebugValue>>,
    by_identity: HashMap<usize, u64>,
    paths: HashMap<u64, String>,
    frame_ids: HashMap<u64, i64>,
}

impl Tables {
    fn forget(&mut self, id: u64) {
        if let Some(weak) = self.by_id.remove(&id) {
            let key = identity_of_weak(&weak);
            if self.by_identity.get(&key) == Some(&id) {
                self.by_identity.remove(&key);
            }
        }
        self.paths.remove(&id);
        self.frame_ids.remove(&id);
    }
}

fn identity(value: &ValueRef) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

fn identity_of_weak(value: &Weak<dyn DebugValue>) -> usize {
    value.as_ptr() as *const () as usize
}

pub struct ValueTracker {
    next_id: AtomicU64,
    tables: RwLock<Tables>,
}

impl Default for ValueTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tables: RwLock::new(Tables::default()),
        }
    }

    fn live_id(tables: &Tables, value: &ValueRef) -> Option<u64> {
        let id = *tables.by_identity.get(&identity(value))?;
        let current = tables.by_id.get(&id)?.upgrade()?;
        (identity(&current) == identity(value)).then_some(id)
    }

    /// The handle for `value`, assigning a new one on first sight.
    ///
    /// Idempotent while `value` stays alive. An address reused by a new
    /// allocation after the old value died gets a new id.
    pub fn register_or_get_id(&self, value: &ValueRef) -> u64 {
        if let Some(id) = Self::live_id(&self.tables.read(), value) {
            return id;
        }

        let mut tables = self.tables.write();
        if let Some(id) = Self::live_id(&tables, value) {
            return id;
        }
        if let Some(stale) = tables.by_identity.get(&identity(value)).copied() {
            tables.forget(stale);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tables.by_id.insert(id, Arc::downgrade(value));
        tables.by_identity.insert(identity(value), id);
        id
    }

    pub fn get_by_id(&self, id: u64) -> Option<ValueRef> {
        self.tables.read().by_id.get(&id)?.upgrade()
    }

    /// Attach a display path to a live handle. Unknown ids are ignored.
    pub fn set_path(&self, id: u64, path: impl Into<String>) {
        let mut tables = self.tables.write();
        if tables.by_id.contains_key(&id) {
            tables.paths.insert(id, path.into());
        }
    }

    pub fn get_path(&self, id: u64) -> Option<String> {
        self.tables.read().paths.get(&id).cloned()
    }

    pub fn set_frame_id(&self, id: u64, frame_id: i64) {
        let mut tables = self.tables.write();
        if tables.by_id.contains_key(&id) {
            tables.frame_ids.insert(id, frame_id);
        }
    }

    pub fn get_frame_id(&self, id: u64) -> Option<i64> {
        self.tables.read().frame_ids.get(&id).copied()
    }

    /// Remove every handle whose value has been dropped. Returns the number of
    /// handles removed.
    pub fn reclaim(&self) -> usize {
        let dead: Vec<u64> = self
            .tables
            .read()
            .by_id
            .iter()
            .filter(|(_, weak)| weak.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        if dead.is_empty() {
            return 0;
        }

        let mut tables = self.tables.write();
        let mut removed = 0;
        for id in dead {
            // Re-check under the write lock; ids are never reused so a dead
            // entry cannot have come back to life.
            if tables.by_id.get(&id).is_some_and(|weak| weak.strong_count() == 0) {
                tables.forget(id);
                removed += 1;
            }
        }
        tracing::trace!(removed, "reclaimed value handles");
        removed
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }
}
