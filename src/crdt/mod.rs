//! The CRDT element hierarchy.
//!
//! Elements are a tagged variant rather than a class hierarchy; operations
//! dispatch on the tag after looking the target up by creation ticket. All
//! elements live in one arena owned by [`root::CrdtRoot`], and tree edges
//! are arena slot ids, so a deep copy of a document is a plain `Clone`.

pub mod array;
pub mod counter;
pub mod object;
pub mod primitive;
pub mod rga_split;
pub mod root;
pub mod text;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

use crate::crdt::array::CrdtArray;
use crate::crdt::counter::{CounterValue, CrdtCounter};
use crate::crdt::object::CrdtObject;
use crate::crdt::primitive::Primitive;
use crate::crdt::root::DataSize;
use crate::crdt::text::CrdtText;
use crate::time::{TimeTicket, TICKET_SIZE};

/// Slot index into the root's element arena.
pub type ElemId = u32;

#[derive(Debug, Clone)]
pub enum Content {
    Object(CrdtObject),
    Array(CrdtArray),
    Counter(CrdtCounter),
    Text(CrdtText),
    Primitive(Primitive),
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Object(_) => "object",
            Content::Array(_) => "array",
            Content::Counter(_) => "counter",
            Content::Text(_) => "text",
            Content::Primitive(_) => "primitive",
        }
    }
}

/// One element: creation/move/removal tickets, a parent edge, and the typed
/// content. Identity is the creation ticket.
#[derive(Debug, Clone)]
pub struct Element {
    pub created_at: TimeTicket,
    pub moved_at: Option<TimeTicket>,
    pub removed_at: Option<TimeTicket>,
    pub parent: Option<ElemId>,
    pub content: Content,
}

impl Element {
    pub fn new(created_at: TimeTicket, content: Content) -> Self {
        Element { created_at, moved_at: None, removed_at: None, parent: None, content }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// The ticket deciding where this element sits relative to concurrent
    /// writes: the latest move wins over the creation.
    pub fn positioned_at(&self) -> TimeTicket {
        self.moved_at.unwrap_or(self.created_at)
    }

    /// Tombstone this element at `removed_at`. Refuses stale removals.
    pub fn remove(&mut self, removed_at: &TimeTicket) -> bool {
        if removed_at.after(&self.positioned_at())
            && self.removed_at.as_ref().map_or(true, |r| removed_at.after(r))
        {
            self.removed_at = Some(*removed_at);
            true
        } else {
            false
        }
    }

    /// This element's own footprint: content bytes plus ticket metadata.
    /// Children count for themselves; a text's tombstoned blocks are
    /// accounted through the garbage ledger, not here.
    pub fn own_data_size(&self) -> DataSize {
        let content = match &self.content {
            Content::Object(_) | Content::Array(_) => DataSize::default(),
            Content::Counter(c) => c.data_size(),
            Content::Primitive(p) => p.data_size(),
            Content::Text(t) => t.data_size().live,
        };
        DataSize {
            data: content.data,
            meta: content.meta
                + TICKET_SIZE
                + if self.is_removed() { TICKET_SIZE } else { 0 },
        }
    }

    pub fn as_object(&self) -> Option<&CrdtObject> {
        match &self.content {
            Content::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut CrdtObject> {
        match &mut self.content {
            Content::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&CrdtArray> {
        match &self.content {
            Content::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut CrdtArray> {
        match &mut self.content {
            Content::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut CrdtText> {
        match &mut self.content {
            Content::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_counter_mut(&mut self) -> Option<&mut CrdtCounter> {
        match &mut self.content {
            Content::Counter(c) => Some(c),
            _ => None,
        }
    }
}

/// A detached element tree carried inside an operation. Creation tickets are
/// baked in when the local change is built, so the payload materializes
/// identically on the speculative clone, the authoritative root, and every
/// remote replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementPayload {
    Primitive(Primitive),
    Counter(CounterValue),
    /// Text is created empty; its content arrives as edit operations.
    Text,
    Object(Vec<PayloadEntry>),
    Array(Vec<PayloadItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    pub key: SmartString,
    pub created_at: TimeTicket,
    pub value: ElementPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadItem {
    pub created_at: TimeTicket,
    pub value: ElementPayload,
}
