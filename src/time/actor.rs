use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DocError;

/// The number of bytes in an actor ID.
pub const ACTOR_ID_SIZE: usize = 16;

/// An opaque 16 byte identifier naming a replica (a client instance).
///
/// Actor IDs are assigned by the server when a client attaches. Until then a
/// document carries [`ActorId::INITIAL`], which is reserved to mean
/// "unassigned". The byte order is the comparison order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ActorId([u8; ACTOR_ID_SIZE]);

impl ActorId {
    /// The reserved "unassigned" actor. Used while a document is detached.
    pub const INITIAL: ActorId = ActorId([0; ACTOR_ID_SIZE]);

    /// The largest possible actor ID. Only used by the max ticket sentinel.
    pub const MAX: ActorId = ActorId([0xff; ACTOR_ID_SIZE]);

    pub fn from_bytes(bytes: [u8; ACTOR_ID_SIZE]) -> Self {
        ActorId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACTOR_ID_SIZE] {
        &self.0
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }

    /// Parse an actor ID from 32 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, DocError> {
        let s = s.as_bytes();
        if s.len() != ACTOR_ID_SIZE * 2 {
            return Err(DocError::InvalidArgument(format!(
                "actor id must be {} hex chars, got {}", ACTOR_ID_SIZE * 2, s.len()
            )));
        }

        fn nibble(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }

        let mut bytes = [0u8; ACTOR_ID_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            let hi = nibble(s[i * 2]);
            let lo = nibble(s[i * 2 + 1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => *b = (hi << 4) | lo,
                _ => return Err(DocError::InvalidArgument("invalid hex in actor id".into())),
            }
        }
        Ok(ActorId(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(ACTOR_ID_SIZE * 2);
        for b in &self.0 {
            out.push(char::from_digit((b >> 4) as u32, 16).unwrap());
            out.push(char::from_digit((b & 0xf) as u32, 16).unwrap());
        }
        out
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            write!(f, "<initial>")
        } else {
            // The leading bytes are usually zero padding. Print the tail.
            write!(f, "{}", &self.to_hex()[ACTOR_ID_SIZE..])
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ActorId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        ActorId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let id = ActorId::from_hex("000000000000abcdef0123456789abcd").unwrap();
        assert_eq!(id.to_hex(), "000000000000abcdef0123456789abcd");
        assert!(!id.is_initial());
        assert!(ActorId::from_hex("xyz").is_err());
        assert!(ActorId::from_hex("zz000000000000000000000000000000").is_err());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = ActorId::from_hex("00000000000000000000000000000001").unwrap();
        let b = ActorId::from_hex("00000000000000000000000000000002").unwrap();
        assert!(a < b);
        assert!(ActorId::INITIAL < a);
        assert!(b < ActorId::MAX);
    }
}
