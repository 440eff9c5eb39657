use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::time::actor::ActorId;
use crate::time::ticket::{Lamport, TimeTicket};

/// A per-actor lamport floor.
///
/// One of these rides on every change: it names what the author had observed
/// from every other actor when the change was made. The engine uses it two
/// ways - causally gating edits against concurrently inserted nodes (an edit
/// may only delete or restyle what its author had seen), and computing the
/// minimum watermark across peers below which tombstones can be physically
/// purged.
///
/// Missing entries read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    entries: HashMap<ActorId, Lamport>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorId) -> Lamport {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor: ActorId, lamport: Lamport) {
        self.entries.insert(actor, lamport);
    }

    pub fn unset(&mut self, actor: &ActorId) {
        self.entries.remove(actor);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &Lamport)> {
        self.entries.iter()
    }

    /// The largest lamport present in the vector.
    pub fn max_lamport(&self) -> Lamport {
        self.entries.values().copied().max().unwrap_or(0)
    }

    /// Pointwise max over the union of keys. Merging clocks on remote
    /// receive.
    pub fn max(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        for (actor, lamport) in &other.entries {
            let e = out.entries.entry(*actor).or_insert(0);
            if *lamport > *e {
                *e = *lamport;
            }
        }
        out
    }

    /// Pointwise min over the union of keys (missing = 0, so any actor
    /// absent on either side clamps the entry to zero). The min across all
    /// live participants is the GC safety threshold.
    pub fn min(&self, other: &VersionVector) -> VersionVector {
        let mut out = VersionVector::new();
        for (actor, lamport) in &self.entries {
            out.entries.insert(*actor, (*lamport).min(other.get(actor)));
        }
        for actor in other.entries.keys() {
            if !self.entries.contains_key(actor) {
                out.entries.insert(*actor, 0);
            }
        }
        out
    }

    /// Whether every peer tracked by this vector has observed `ticket`.
    /// This is the purge condition for a tombstone removed at `ticket`.
    pub fn covers(&self, ticket: &TimeTicket) -> bool {
        ticket.lamport <= self.get(&ticket.actor)
    }
}

impl FromIterator<(ActorId, Lamport)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (ActorId, Lamport)>>(iter: T) -> Self {
        VersionVector { entries: iter.into_iter().collect() }
    }
}
