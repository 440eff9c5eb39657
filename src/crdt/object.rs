//! Object storage: key -> child element, last writer wins per key.
//!
//! This is plain storage; the LWW decisions need the children's tickets and
//! therefore run at the root level, where the arena can be consulted. A key
//! may map to a removed element (a hidden tombstone) until GC drops it.

use std::collections::HashMap;

use smartstring::alias::String as SmartString;

use crate::crdt::ElemId;

#[derive(Debug, Clone, Default)]
pub struct CrdtObject {
    entries: HashMap<SmartString, ElemId>,
}

impl CrdtObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ElemId> {
        self.entries.get(key).copied()
    }

    /// Point `key` at `elem`, returning whatever it pointed at before.
    pub fn set_entry(&mut self, key: &str, elem: ElemId) -> Option<ElemId> {
        self.entries.insert(key.into(), elem)
    }

    /// The key currently mapping to `elem`, if any.
    pub fn key_of(&self, elem: ElemId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, &id)| id == elem)
            .map(|(k, _)| k.as_str())
    }

    /// Forget `elem` entirely (GC). Returns true if a key was dropped.
    pub fn purge_entry(&mut self, elem: ElemId) -> bool {
        if let Some(key) = self.key_of(elem).map(SmartString::from) {
            self.entries.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ElemId)> {
        self.entries.iter().map(|(k, &id)| (k.as_str(), id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
