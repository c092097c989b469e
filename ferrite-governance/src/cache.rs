//! Bounded insertion-ordered key/value stores backing the vote caches.
//!
//! Both containers evict the oldest-inserted key when full.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Insertion-ordered map with a fixed capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CappedMap<K: Eq + Hash, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    max_size: usize,
}

impl<K: Clone + Eq + Hash, V> CappedMap<K, V> {
    pub fn new(max_size: usize) -> Self {
        CappedMap {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Insert a key/value pair. Returns false (and leaves the existing
    /// value untouched) if the key is already present. Evicts the oldest
    /// key when full.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.map.contains_key(&key) {
            return false;
        }
        while self.map.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
        true
    }

    pub fn erase(&mut self, key: &K) -> bool {
        if self.map.remove(key).is_none() {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entries in insertion order.
    pub fn item_list(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order.iter().filter_map(|k| self.map.get_key_value(k))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// Insertion-ordered multimap with a fixed total-value capacity and
/// per-value erase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CappedMultiMap<K: Eq + Hash, V> {
    map: HashMap<K, Vec<V>>,
    order: VecDeque<K>,
    len: usize,
    max_size: usize,
}

impl<K: Clone + Eq + Hash, V: PartialEq> CappedMultiMap<K, V> {
    pub fn new(max_size: usize) -> Self {
        CappedMultiMap {
            map: HashMap::new(),
            order: VecDeque::new(),
            len: 0,
            max_size: max_size.max(1),
        }
    }

    /// Insert a value under `key`. Returns false if the exact (key, value)
    /// pair is already present. Evicts whole oldest keys when full.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(values) = self.map.get(&key) {
            if values.contains(&value) {
                return false;
            }
        }
        while self.len >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(values) = self.map.remove(&oldest) {
                    self.len -= values.len();
                }
            } else {
                break;
            }
        }
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
            self.map.insert(key.clone(), Vec::new());
        }
        if let Some(values) = self.map.get_mut(&key) {
            values.push(value);
            self.len += 1;
        }
        true
    }

    /// Remove every value stored under `key`.
    pub fn erase_key(&mut self, key: &K) -> bool {
        match self.map.remove(key) {
            Some(values) => {
                self.len -= values.len();
                self.order.retain(|k| k != key);
                true
            }
            None => false,
        }
    }

    /// Remove one exact (key, value) pair.
    pub fn erase(&mut self, key: &K, value: &V) -> bool {
        let Some(values) = self.map.get_mut(key) else {
            return false;
        };
        let Some(pos) = values.iter().position(|v| v == value) else {
            return false;
        };
        values.remove(pos);
        self.len -= 1;
        if values.is_empty() {
            self.map.remove(key);
            self.order.retain(|k| k != key);
        }
        true
    }

    pub fn get_all(&self, key: &K) -> Vec<V>
    where
        V: Clone,
    {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.order.iter().cloned().collect()
    }

    /// Total number of stored values.
    pub fn size(&self) -> usize {
        self.len
    }

    /// (key, value) pairs grouped by key in key insertion order.
    pub fn item_list(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.map.get_key_value(k))
            .flat_map(|(k, values)| values.iter().map(move |v| (k, v)))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
        self.len = 0;
    }
}
