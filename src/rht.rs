//! Replicated hash table: a last-writer-wins map with tombstones.
//!
//! Text attributes live in one of these per block. Writes only land if
//! their ticket is later than the incumbent's; whatever gets displaced
//! sticks around as a tombstone until the garbage collector proves every
//! peer has seen the displacement.

use std::collections::HashMap;

use smartstring::alias::String as SmartString;

use crate::crdt::root::DataSize;
use crate::time::{TimeTicket, TICKET_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhtNode {
    pub key: SmartString,
    pub value: SmartString,
    pub updated_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
}

impl RhtNode {
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    pub fn data_size(&self) -> DataSize {
        DataSize {
            // Strings are accounted as UTF-16 code units, matching the wire
            // format's notion of length.
            data: 2 * (utf16_len(&self.key) + utf16_len(&self.value)) as i64,
            meta: TICKET_SIZE + if self.is_removed() { TICKET_SIZE } else { 0 },
        }
    }
}

pub(crate) fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// The LWW map. `live` holds the current winner per key (possibly a removed
/// marker); `tombstones` holds displaced writes awaiting purge.
#[derive(Debug, Clone, Default)]
pub struct Rht {
    live: HashMap<SmartString, RhtNode>,
    tombstones: Vec<RhtNode>,
}

impl Rht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key = value` at `ticket`. Loses to any incumbent with a later
    /// ticket. Returns the displaced node, which the caller must register as
    /// a garbage pair.
    pub fn set(
        &mut self,
        key: &str,
        value: &str,
        ticket: TimeTicket,
    ) -> Option<RhtNode> {
        if let Some(prev) = self.live.get(key) {
            if !ticket.after(&prev.updated_at) {
                return None;
            }
        }

        let node = RhtNode {
            key: key.into(),
            value: value.into(),
            updated_at: ticket,
            removed_at: None,
        };
        let displaced = self.live.insert(key.into(), node);
        displaced.map(|mut old| {
            old.removed_at = Some(ticket);
            self.tombstones.push(old.clone());
            old
        })
    }

    /// Remove `key` at `ticket`. The entry stays as a removed marker so that
    /// later concurrent writes still see the tombstone's ticket; the marker
    /// itself is returned for garbage registration.
    pub fn remove(&mut self, key: &str, ticket: TimeTicket) -> Option<RhtNode> {
        let node = self.live.get_mut(key)?;
        if !ticket.after(&node.updated_at) {
            return None;
        }
        node.updated_at = ticket;
        node.removed_at = Some(ticket);
        Some(node.clone())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match self.live.get(key) {
            Some(node) if !node.is_removed() => Some(&node.value),
            _ => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Live entries, unordered.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.live
            .values()
            .filter(|n| !n.is_removed())
            .map(|n| (n.key.as_str(), n.value.as_str()))
    }

    /// Drop a node that GC has proven invisible. Matches either a displaced
    /// tombstone or a removed live marker (in which case the key disappears
    /// for good). Returns the purged entry's size.
    pub fn purge(&mut self, key: &str, updated_at: &TimeTicket) -> Option<DataSize> {
        if let Some(pos) = self
            .tombstones
            .iter()
            .position(|n| n.key == key && n.updated_at == *updated_at)
        {
            return Some(self.tombstones.swap_remove(pos).data_size());
        }
        if let Some(node) = self.live.get(key) {
            if node.is_removed() && node.updated_at == *updated_at {
                return self.live.remove(key).map(|n| n.data_size());
            }
        }
        None
    }

    pub fn data_size(&self) -> DataSize {
        let mut size = DataSize::default();
        for n in self.live.values().filter(|n| !n.is_removed()) {
            size = size + n.data_size();
        }
        size
    }

    /// `{"k":"v",...}` with keys sorted, so replicas print identically.
    pub fn to_sorted_json(&self) -> String {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let mut out = String::from("{");
        for (i, (k, v)) in entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{}:{}", serde_json::Value::from(*k), serde_json::Value::from(*v)));
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::ActorId;

    fn ticket(lamport: u64, delimiter: u32) -> TimeTicket {
        TimeTicket::new(lamport, delimiter, ActorId::INITIAL)
    }

    #[test]
    fn lww_set() {
        let mut rht = Rht::new();
        assert!(rht.set("bold", "true", ticket(1, 0)).is_none());
        assert_eq!(rht.get("bold"), Some("true"));

        // A later write displaces the old node into the tombstone set.
        let displaced = rht.set("bold", "false", ticket(2, 0)).unwrap();
        assert_eq!(displaced.value, "true");
        assert!(displaced.is_removed());
        assert_eq!(rht.get("bold"), Some("false"));

        // An earlier write loses.
        assert!(rht.set("bold", "loser", ticket(1, 5)).is_none());
        assert_eq!(rht.get("bold"), Some("false"));
    }

    #[test]
    fn remove_leaves_marker() {
        let mut rht = Rht::new();
        rht.set("k", "v", ticket(1, 0));
        assert!(rht.remove("k", ticket(1, 0)).is_none()); // not after
        let marker = rht.remove("k", ticket(2, 0)).unwrap();
        assert!(marker.is_removed());
        assert!(!rht.has("k"));

        // The marker still wins ties against stale writes.
        assert!(rht.set("k", "stale", ticket(1, 9)).is_none());
        assert!(!rht.has("k"));

        // ... and purging it forgets the key entirely.
        assert!(rht.purge("k", &ticket(2, 0)).is_some());
        assert!(rht.set("k", "fresh", ticket(1, 9)).is_none());
        assert_eq!(rht.get("k"), Some("fresh"));
    }

    #[test]
    fn purge_tombstone() {
        let mut rht = Rht::new();
        rht.set("k", "a", ticket(1, 0));
        let displaced = rht.set("k", "b", ticket(2, 0)).unwrap();
        assert!(rht.purge(&displaced.key, &displaced.updated_at).is_some());
        assert_eq!(rht.to_sorted_json(), "{\"k\":\"b\"}");
    }

    #[test]
    fn sorted_json() {
        let mut rht = Rht::new();
        rht.set("b", "2", ticket(1, 0));
        rht.set("a", "1", ticket(1, 1));
        rht.set("c", "3", ticket(1, 2));
        assert_eq!(rht.to_sorted_json(), "{\"a\":\"1\",\"b\":\"2\",\"c\":\"3\"}");
    }
}
