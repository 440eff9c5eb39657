use serde::{Deserialize, Serialize};

/// The ⟨clientSeq, serverSeq⟩ watermark exchanged with the server. Forwarding
/// is pointwise monotone, so replayed or reordered acks can never move a
/// document backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub server_seq: u64,
    pub client_seq: u32,
}

impl Checkpoint {
    pub const INITIAL: Checkpoint = Checkpoint { server_seq: 0, client_seq: 0 };

    pub fn new(server_seq: u64, client_seq: u32) -> Self {
        Checkpoint { server_seq, client_seq }
    }

    pub fn forward(&self, other: &Checkpoint) -> Checkpoint {
        Checkpoint {
            server_seq: self.server_seq.max(other.server_seq),
            client_seq: self.client_seq.max(other.client_seq),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn forward_is_pointwise() {
        let a = Checkpoint::new(5, 3);
        let b = Checkpoint::new(2, 9);
        assert_eq!(a.forward(&b), Checkpoint::new(5, 9));
        assert_eq!(b.forward(&a), Checkpoint::new(5, 9));
        assert_eq!(a.forward(&a), a);
    }
}
