//! Keeps display-only values alive between a render and the client's
//! follow-up `variables` request.
//!
//! The value tracker only holds weak references, so a value synthesized while
//! rendering (nothing in the debuggee owns it) would otherwise vanish before
//! the client could expand it. Entries are bounded both by count (least
//! recently used goes first) and by age.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Inner<K, V> {
    entries: HashMap<K, (V, Instant)>,
    // Least recently used at the front.
    order: VecDeque<K>,
}

pub struct ExpiringLruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> ExpiringLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Instant::now());
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn put_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.clone(), (value, now)).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key);
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();
        let (value, inserted) = inner.entries.get(key)?.clone();
        if now.saturating_duration_since(inserted) > self.ttl {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.clone());
        Some(value)
    }

    /// Drop every entry older than the TTL. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, (_, inserted)| now.saturating_duration_since(*inserted) <= ttl);
        let Inner { entries, order } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
