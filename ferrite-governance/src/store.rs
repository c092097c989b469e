//! Canonical store of live governance objects.
//!
//! Iteration preserves insertion order; sync replies depend on that.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ferrite_shared_types::Hash;

use crate::object::GovernanceObjectState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStore {
    map: HashMap<Hash, GovernanceObjectState>,
    order: Vec<Hash>,
}

impl ObjectStore {
    pub fn new() -> Self {
        ObjectStore::default()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.map.contains_key(hash)
    }

    pub fn find(&self, hash: &Hash) -> Option<&GovernanceObjectState> {
        self.map.get(hash)
    }

    pub fn find_mut(&mut self, hash: &Hash) -> Option<&mut GovernanceObjectState> {
        self.map.get_mut(hash)
    }

    /// Insert unless the hash is already present; returns whether the
    /// object was inserted. Duplicate emplace is a no-op.
    pub fn emplace_unique(&mut self, object: GovernanceObjectState) -> bool {
        let hash = object.hash();
        if self.map.contains_key(&hash) {
            return false;
        }
        self.order.push(hash);
        self.map.insert(hash, object);
        true
    }

    pub fn erase(&mut self, hash: &Hash) -> Option<GovernanceObjectState> {
        let removed = self.map.remove(hash)?;
        self.order.retain(|h| h != hash);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hashes in insertion order; a stable snapshot for loops that
    /// mutate the store while walking it.
    pub fn hashes(&self) -> Vec<Hash> {
        self.order.clone()
    }

    /// Objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &GovernanceObjectState)> {
        self.order.iter().filter_map(|h| self.map.get_key_value(h))
    }

    /// Objects created at or after `time`.
    pub fn all_newer_than(&self, time: i64) -> Vec<&GovernanceObjectState> {
        self.iter()
            .filter(|(_, obj)| obj.object.creation_time >= time)
            .map(|(_, obj)| obj)
            .collect()
    }
}
