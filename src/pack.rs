//! Wire-facing shapes: what the external codec and transport hand the core.
//!
//! The binary codec itself lives outside this crate; these are the decoded
//! forms. A `ChangePack` flows both directions - pushes carry local
//! changes up, pulls bring remote changes (or a whole snapshot) down.

use std::collections::HashMap;
use std::fmt;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

use crate::change::{Change, Checkpoint};
use crate::crdt::root::CrdtRoot;
use crate::error::DocError;
use crate::presence::PresenceData;
use crate::time::{ActorId, VersionVector};

/// A validated document key: 4..=120 chars of `[a-z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey(SmartString);

impl DocKey {
    pub fn new(key: &str) -> Result<Self, DocError> {
        let ok_len = (4..=120).contains(&key.len());
        let ok_chars = key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.' | b'_'));
        if !ok_len || !ok_chars {
            return Err(DocError::InvalidArgument(format!("invalid document key {key:?}")));
        }
        Ok(DocKey(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded snapshot: the full materialized root plus the presence table
/// that was current at the snapshot's server sequence.
#[derive(Debug, Clone)]
pub struct DocSnapshot {
    pub root: CrdtRoot,
    pub presences: HashMap<ActorId, PresenceData>,
}

/// One round of sync. Either `changes` or `snapshot` carries the payload;
/// `version_vector` is the server's minimum-synced vector, which doubles as
/// the GC threshold on receive.
#[derive(Debug, Clone)]
pub struct ChangePack {
    pub doc_key: DocKey,
    pub checkpoint: Checkpoint,
    pub is_removed: bool,
    pub changes: Vec<Change>,
    pub snapshot: Option<DocSnapshot>,
    pub snapshot_version_vector: Option<VersionVector>,
    pub version_vector: VersionVector,
}

/// Watch-stream event tags, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum WatchDocEventType {
    DocumentWatched = 0,
    DocumentUnwatched = 1,
    DocumentBroadcast = 2,
}

#[derive(Debug, Clone)]
pub struct BroadcastBody {
    pub topic: SmartString,
    /// JSON, as raw bytes. The core doesn't interpret it.
    pub payload: Vec<u8>,
}

/// One message from the server's watch stream.
#[derive(Debug, Clone)]
pub enum WatchDocumentResponse {
    /// First message after subscribing: who is online right now.
    Initialization { client_ids: Vec<ActorId> },
    Event {
        event_type: WatchDocEventType,
        publisher: ActorId,
        body: Option<BroadcastBody>,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doc_key_validation() {
        assert!(DocKey::new("my-doc.v2_x").is_ok());
        assert!(DocKey::new("abc").is_err()); // too short
        assert!(DocKey::new("No-Caps").is_err());
        assert!(DocKey::new(&"x".repeat(121)).is_err());
    }

    #[test]
    fn watch_event_tags_roundtrip() {
        assert_eq!(WatchDocEventType::try_from(2).unwrap(), WatchDocEventType::DocumentBroadcast);
        assert!(WatchDocEventType::try_from(9).is_err());
    }
}
