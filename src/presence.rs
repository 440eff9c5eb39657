//! Presence: per-actor ephemeral metadata (cursors, selections, names).
//!
//! Presence rides on changes but is not CRDT state - it is last-write-wins
//! per actor and never persisted. The engine only cares about the contract
//! with the change pipeline: a change optionally carries one delta, either a
//! full replacement map or a clear.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One actor's presence payload.
pub type PresenceData = serde_json::Map<String, Json>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceChange {
    /// Replace the actor's presence with this map.
    Put { presence: PresenceData },
    /// The actor is gone (detach / unwatch).
    Clear,
}

/// Deterministic rendering for comparisons in tests and devtools.
pub fn sorted_presence_json(presence: &PresenceData) -> String {
    let mut keys: Vec<&String> = presence.keys().collect();
    keys.sort_unstable();
    let mut out = String::from("{");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}:{}", Json::from(key.as_str()), presence[*key]));
    }
    out.push('}');
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sorted_rendering() {
        let mut p = PresenceData::new();
        p.insert("cursor".into(), serde_json::json!(2));
        p.insert("anchor".into(), serde_json::json!([1, 2]));
        assert_eq!(sorted_presence_json(&p), "{\"anchor\":[1,2],\"cursor\":2}");
    }
}
