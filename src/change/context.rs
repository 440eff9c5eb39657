use std::collections::HashSet;

use serde_json::Value as Json;
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

use crate::change::change_id::ChangeId;
use crate::change::Change;
use crate::operation::Operation;
use crate::presence::{PresenceChange, PresenceData};
use crate::time::ticket::INITIAL_DELIMITER;
use crate::time::{Delimiter, TimeTicket};

/// Accumulates one local mutation batch: the operations a mutator produces,
/// their tickets, and the presence delta.
///
/// Ticket issuance is the important part. Every ticket in a batch shares the
/// tentative next id's lamport and differs only in the delimiter, which
/// increments per issue - a dense per-change total order over everything the
/// user did in one `update` call.
#[derive(Debug)]
pub struct ChangeContext {
    prev_id: ChangeId,
    next_id: ChangeId,
    delimiter: Delimiter,
    message: Option<SmartString>,
    operations: SmallVec<[Operation; 2]>,
    presence_change: Option<PresenceChange>,
    /// The actor's presence as it stood when the context was built. Reversal
    /// values are snapshotted from here.
    prior_presence: PresenceData,
    working_presence: PresenceData,
    reverse_keys: HashSet<String>,
}

impl ChangeContext {
    pub fn new(prev_id: &ChangeId, prior_presence: PresenceData, message: Option<SmartString>) -> Self {
        ChangeContext {
            prev_id: prev_id.clone(),
            next_id: prev_id.next(false),
            delimiter: INITIAL_DELIMITER,
            message,
            operations: SmallVec::new(),
            presence_change: None,
            working_presence: prior_presence.clone(),
            prior_presence,
            reverse_keys: HashSet::new(),
        }
    }

    /// A fresh ticket inside this batch.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.delimiter += 1;
        self.next_id.create_time_ticket(self.delimiter)
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    /// Merge entries into the actor's presence. Keys written with
    /// `add_to_history` get their prior values captured for undo.
    pub fn set_presence(&mut self, entries: PresenceData, add_to_history: bool) {
        for (key, value) in entries {
            if add_to_history {
                self.reverse_keys.insert(key.clone());
            }
            self.working_presence.insert(key, value);
        }
        self.presence_change =
            Some(PresenceChange::Put { presence: self.working_presence.clone() });
    }

    pub fn clear_presence(&mut self) {
        self.working_presence.clear();
        self.presence_change = Some(PresenceChange::Clear);
    }

    pub fn has_change(&self) -> bool {
        !self.operations.is_empty() || self.presence_change.is_some()
    }

    pub fn is_presence_only(&self) -> bool {
        self.operations.is_empty()
    }

    /// The keys the user opted into reversing, mapped to their pre-update
    /// values (`null` when the key didn't exist).
    pub fn reverse_presence(&self) -> Option<PresenceData> {
        if self.reverse_keys.is_empty() {
            return None;
        }
        let mut entries = PresenceData::new();
        for key in &self.reverse_keys {
            let value = self.prior_presence.get(key).cloned().unwrap_or(Json::Null);
            entries.insert(key.clone(), value);
        }
        Some(entries)
    }

    /// Seal the batch. Presence-only changes consume no lamport: their id is
    /// the previous id's clock-preserving successor.
    pub fn to_change(self) -> Change {
        let id = if self.is_presence_only() {
            self.prev_id.next(true)
        } else {
            self.next_id
        };
        Change {
            id,
            message: self.message,
            operations: self.operations,
            presence_change: self.presence_change,
        }
    }
}
