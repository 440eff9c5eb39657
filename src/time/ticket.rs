use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::actor::ActorId;

/// A lamport scalar. Advanced on every local edit and on every remote
/// observation.
pub type Lamport = u64;

/// Disambiguates multiple tickets issued inside one change.
pub type Delimiter = u32;

/// Where a change context starts counting delimiters from.
pub const INITIAL_DELIMITER: Delimiter = 0;

/// Serialized footprint of one ticket: lamport (8) + delimiter (4) + actor
/// (16). The size accountant charges this for every ticket an element keeps
/// alive.
pub const TICKET_SIZE: i64 = 28;

/// A point in logical time: ⟨lamport, delimiter, actor⟩.
///
/// Tickets are immutable and totally ordered: lamport first, then actor,
/// then delimiter. Every CRDT element and operation is stamped with one, and
/// the order decides every conflict the engine ever has to break.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTicket {
    pub lamport: Lamport,
    pub delimiter: Delimiter,
    pub actor: ActorId,
}

impl TimeTicket {
    /// The minimum ticket. Stamps the root object and the list head
    /// sentinels.
    pub const INITIAL: TimeTicket = TimeTicket {
        lamport: 0,
        delimiter: 0,
        actor: ActorId::INITIAL,
    };

    /// A ticket after every ticket that will ever be issued.
    pub const MAX: TimeTicket = TimeTicket {
        lamport: Lamport::MAX,
        delimiter: Delimiter::MAX,
        actor: ActorId::MAX,
    };

    pub fn new(lamport: Lamport, delimiter: Delimiter, actor: ActorId) -> Self {
        TimeTicket { lamport, delimiter, actor }
    }

    /// Returns true if `self` is strictly later than `other`.
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}:{}", self.lamport, self.actor, self.delimiter)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn total_order() {
        let a = ActorId::from_hex("00000000000000000000000000000001").unwrap();
        let b = ActorId::from_hex("00000000000000000000000000000002").unwrap();

        // Lamport dominates.
        assert!(TimeTicket::new(2, 0, a).after(&TimeTicket::new(1, 9, b)));
        // Then actor.
        assert!(TimeTicket::new(1, 0, b).after(&TimeTicket::new(1, 9, a)));
        // Then delimiter.
        assert!(TimeTicket::new(1, 2, a).after(&TimeTicket::new(1, 1, a)));

        assert!(TimeTicket::INITIAL < TimeTicket::new(1, 1, a));
        assert!(TimeTicket::new(u64::MAX, 0, b) < TimeTicket::MAX);
    }
}
