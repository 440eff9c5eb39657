use serde::{Deserialize, Serialize};

use crate::time::{ActorId, Delimiter, Lamport, TimeTicket, VersionVector};

/// Identity and clock state of one change.
///
/// `client_seq` numbers the changes this client has produced; `server_seq`
/// is stamped by the server once acknowledged. The lamport and version
/// vector are the causal side: they advance on every non-presence change and
/// on every remote observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeId {
    pub client_seq: u32,
    pub server_seq: u64,
    pub lamport: Lamport,
    pub actor: ActorId,
    pub version_vector: VersionVector,
}

impl ChangeId {
    /// The id a fresh, detached document starts from.
    pub fn initial() -> Self {
        ChangeId {
            client_seq: 0,
            server_seq: 0,
            lamport: 0,
            actor: ActorId::INITIAL,
            version_vector: VersionVector::new(),
        }
    }

    /// The successor id. Presence-only changes (`exclude_clocks`) consume a
    /// client sequence number but leave logical time untouched.
    pub fn next(&self, exclude_clocks: bool) -> ChangeId {
        if exclude_clocks {
            return ChangeId { client_seq: self.client_seq + 1, ..self.clone() };
        }
        let lamport = self.lamport + 1;
        let mut version_vector = self.version_vector.clone();
        version_vector.set(self.actor, lamport);
        ChangeId {
            client_seq: self.client_seq + 1,
            server_seq: self.server_seq,
            lamport,
            actor: self.actor,
            version_vector,
        }
    }

    /// Clock advancement on remote receive: strictly above both sides'
    /// lamports, version vectors merged pointwise, own entry pinned to the
    /// new lamport. This is the only rule that advances clocks for remote
    /// changes.
    pub fn sync_clocks(&self, other: &ChangeId) -> ChangeId {
        let lamport = self.lamport.max(other.lamport) + 1;
        let mut version_vector = self.version_vector.max(&other.version_vector);
        version_vector.set(self.actor, lamport);
        ChangeId {
            client_seq: self.client_seq,
            server_seq: self.server_seq,
            lamport,
            actor: self.actor,
            version_vector,
        }
    }

    pub fn create_time_ticket(&self, delimiter: Delimiter) -> TimeTicket {
        TimeTicket::new(self.lamport, delimiter, self.actor)
    }

    /// Adopt the actor assigned at attach time. The vector entry keyed by
    /// the placeholder actor moves along.
    pub fn set_actor(&mut self, actor: ActorId) {
        if self.actor != ActorId::INITIAL {
            // Already assigned; changing identity mid-flight is not a thing.
            return;
        }
        let own = self.version_vector.get(&self.actor);
        if own > 0 {
            self.version_vector.unset(&ActorId::INITIAL);
            self.version_vector.set(actor, own);
        }
        self.actor = actor;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn actor(n: u8) -> ActorId {
        let mut bytes = [0u8; 16];
        bytes[15] = n;
        ActorId::from_bytes(bytes)
    }

    #[test]
    fn next_advances_clocks() {
        let mut id = ChangeId::initial();
        id.set_actor(actor(1));
        let next = id.next(false);
        assert_eq!(next.client_seq, 1);
        assert_eq!(next.lamport, 1);
        assert_eq!(next.version_vector.get(&actor(1)), 1);

        // Presence-only: seq moves, time doesn't.
        let presence = next.next(true);
        assert_eq!(presence.client_seq, 2);
        assert_eq!(presence.lamport, 1);
    }

    #[test]
    fn sync_clocks_dominates_both() {
        let mut a = ChangeId::initial();
        a.set_actor(actor(1));
        let a = a.next(false).next(false); // lamport 2

        let mut b = ChangeId::initial();
        b.set_actor(actor(2));
        let b = b.next(false).next(false).next(false).next(false).next(false); // lamport 5

        let synced = a.sync_clocks(&b);
        assert_eq!(synced.lamport, 6);
        assert_eq!(synced.actor, actor(1));
        assert_eq!(synced.version_vector.get(&actor(1)), 6);
        assert_eq!(synced.version_vector.get(&actor(2)), 5);
    }
}
