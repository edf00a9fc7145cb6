//! Bounded least-recently-used cache
//!
//! Exact LRU: every `get` moves the key to the most-recent position and an
//! insert beyond capacity evicts the single least-recent key. Safe to share
//! across concurrently running units; no lock is held across an await.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, V>,
    // front = most-recent, back = least-recent
    order: VecDeque<K>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_front(key.clone());
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Get without changing recency
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().map.get(key).cloned()
    }

    /// Get and mark most-recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned()?;
        inner.touch(key);
        Some(value)
    }

    /// Insert or replace. Returns the evicted entry, if any.
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        let mut inner = self.inner.lock();

        if inner.map.insert(key.clone(), value).is_some() {
            inner.touch(&key);
            return None;
        }
        inner.order.push_front(key);

        if inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_back() {
                return inner.map.remove(&oldest).map(|v| (oldest, v));
            }
        }
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.remove(key)?;
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        Some(value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }
}
