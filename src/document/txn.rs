//! The local mutator surface.
//!
//! A [`Transaction`] runs inside `Document::update` against the speculative
//! clone. Every method resolves its target by JSON path, builds a typed
//! operation with tickets issued from the change context, applies it to the
//! clone immediately (so later statements in the same mutator see the
//! effect), and appends it to the batch. Nothing here touches the
//! authoritative root.

use serde_json::Value as Json;
use smartstring::alias::String as SmartString;

use crate::change::ChangeContext;
use crate::crdt::counter::CounterValue;
use crate::crdt::primitive::Primitive;
use crate::crdt::root::CrdtRoot;
use crate::crdt::text::CrdtText;
use crate::crdt::{Content, ElemId, ElementPayload, PayloadEntry, PayloadItem};
use crate::error::DocError;
use crate::operation::Operation;
use crate::presence::PresenceData;
use crate::time::TimeTicket;

pub struct Transaction<'a> {
    ctx: &'a mut ChangeContext,
    root: &'a mut CrdtRoot,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, root: &'a mut CrdtRoot) -> Self {
        Transaction { ctx, root }
    }

    // ---- reads -----------------------------------------------------------

    /// The speculative state, as plain JSON.
    pub fn json(&self) -> Json {
        self.root.to_json()
    }

    pub fn text_len(&self, path: &str) -> Result<usize, DocError> {
        Ok(self.text_at(path)?.1.len())
    }

    // ---- object ----------------------------------------------------------

    /// `path = value`, building nested objects/arrays/primitives from JSON.
    /// The path's last segment is the key; everything before it must resolve
    /// to an object.
    pub fn set(&mut self, path: &str, value: &Json) -> Result<(), DocError> {
        let (parent, key) = self.object_and_key(path)?;
        let (created_at, payload) = build_payload(self.ctx, value)?;
        let executed_at = self.ctx.issue_time_ticket();
        self.apply(Operation::Set { parent, key, created_at, value: payload, executed_at })
    }

    /// Create an empty text at `path`.
    pub fn set_text(&mut self, path: &str) -> Result<(), DocError> {
        let (parent, key) = self.object_and_key(path)?;
        let created_at = self.ctx.issue_time_ticket();
        let executed_at = self.ctx.issue_time_ticket();
        self.apply(Operation::Set {
            parent,
            key,
            created_at,
            value: ElementPayload::Text,
            executed_at,
        })
    }

    /// Create a counter at `path`.
    pub fn set_counter(&mut self, path: &str, value: CounterValue) -> Result<(), DocError> {
        let (parent, key) = self.object_and_key(path)?;
        let created_at = self.ctx.issue_time_ticket();
        let executed_at = self.ctx.issue_time_ticket();
        self.apply(Operation::Set {
            parent,
            key,
            created_at,
            value: ElementPayload::Counter(value),
            executed_at,
        })
    }

    /// Remove the element at `path` (object value or array item).
    pub fn remove(&mut self, path: &str) -> Result<(), DocError> {
        let target = self.root.resolve_path(path)?;
        let parent = self
            .root
            .elem(target)
            .parent
            .ok_or_else(|| DocError::InvalidArgument("cannot remove the root object".into()))?;
        let op = Operation::Remove {
            parent: self.root.elem(parent).created_at,
            created_at: self.root.elem(target).created_at,
            executed_at: self.ctx.issue_time_ticket(),
        };
        self.apply(op)
    }

    // ---- array -----------------------------------------------------------

    /// Append to the array at `path`.
    pub fn push(&mut self, path: &str, value: &Json) -> Result<(), DocError> {
        let (arr_ticket, arr_id) = self.array_at(path)?;
        let prev_created = self
            .root
            .elem(arr_id)
            .as_array()
            .expect("checked array")
            .iter()
            .last()
            .map(|id| self.root.elem(id).created_at)
            .unwrap_or(TimeTicket::INITIAL);
        let (created_at, payload) = build_payload(self.ctx, value)?;
        let executed_at = self.ctx.issue_time_ticket();
        self.apply(Operation::Add {
            parent: arr_ticket,
            prev_created,
            created_at,
            value: payload,
            executed_at,
        })
    }

    /// Move the live item at `target_index` to sit after `prev_index`
    /// (`None` = the front).
    pub fn move_after(
        &mut self,
        path: &str,
        target_index: usize,
        prev_index: Option<usize>,
    ) -> Result<(), DocError> {
        let (arr_ticket, arr_id) = self.array_at(path)?;
        let target = self.live_child(arr_id, target_index)?;
        let prev_created = match prev_index {
            None => TimeTicket::INITIAL,
            Some(i) => {
                let prev = self.live_child(arr_id, i)?;
                self.root.elem(prev).created_at
            }
        };
        let op = Operation::Move {
            parent: arr_ticket,
            prev_created,
            created_at: self.root.elem(target).created_at,
            executed_at: self.ctx.issue_time_ticket(),
        };
        self.apply(op)
    }

    /// Replace the live item at `index` with a new value.
    pub fn set_at(&mut self, path: &str, index: usize, value: &Json) -> Result<(), DocError> {
        let (arr_ticket, arr_id) = self.array_at(path)?;
        let target = self.live_child(arr_id, index)?;
        let target_created = self.root.elem(target).created_at;
        let (new_created_at, payload) = build_payload(self.ctx, value)?;
        let executed_at = self.ctx.issue_time_ticket();
        self.apply(Operation::ArraySet {
            parent: arr_ticket,
            created_at: target_created,
            new_created_at,
            value: payload,
            executed_at,
        })
    }

    // ---- counter ---------------------------------------------------------

    pub fn increase(&mut self, path: &str, by: i64) -> Result<(), DocError> {
        let id = self.root.resolve_path(path)?;
        if !matches!(self.root.elem(id).content, Content::Counter(_)) {
            return Err(DocError::InvalidArgument(format!("{path} is not a counter")));
        }
        let op = Operation::Increase {
            parent: self.root.elem(id).created_at,
            value: by,
            executed_at: self.ctx.issue_time_ticket(),
        };
        self.apply(op)
    }

    // ---- text ------------------------------------------------------------

    /// Replace `[from, to)` of the text at `path` with `content`.
    pub fn edit(&mut self, path: &str, from: usize, to: usize, content: &str) -> Result<(), DocError> {
        self.edit_with_attributes(path, from, to, content, &[])
    }

    pub fn edit_with_attributes(
        &mut self,
        path: &str,
        from: usize,
        to: usize,
        content: &str,
        attributes: &[(&str, &str)],
    ) -> Result<(), DocError> {
        let (ticket, text) = self.text_at(path)?;
        let (from_pos, to_pos) = text.pos_range(from, to)?;
        let op = Operation::Edit {
            parent: ticket,
            from: from_pos,
            to: to_pos,
            content: content.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (SmartString::from(*k), SmartString::from(*v)))
                .collect(),
            executed_at: self.ctx.issue_time_ticket(),
        };
        self.apply(op)
    }

    /// Style `[from, to)`. `None` values remove their key.
    pub fn style(
        &mut self,
        path: &str,
        from: usize,
        to: usize,
        attributes: &[(&str, Option<&str>)],
    ) -> Result<(), DocError> {
        let (ticket, text) = self.text_at(path)?;
        let (from_pos, to_pos) = text.pos_range(from, to)?;
        let op = Operation::Style {
            parent: ticket,
            from: from_pos,
            to: to_pos,
            attributes: attributes
                .iter()
                .map(|(k, v)| (SmartString::from(*k), v.map(SmartString::from)))
                .collect(),
            executed_at: self.ctx.issue_time_ticket(),
        };
        self.apply(op)
    }

    // ---- presence --------------------------------------------------------

    /// Merge entries into this client's presence. Prior values of the
    /// written keys are captured so undo can restore them.
    pub fn set_presence(&mut self, entries: PresenceData) {
        self.ctx.set_presence(entries, true);
    }

    /// Same, without capturing undo history (high-churn data like cursor
    /// trails).
    pub fn set_presence_without_history(&mut self, entries: PresenceData) {
        self.ctx.set_presence(entries, false);
    }

    /// Drop this client's presence entirely. Detach flows send this as the
    /// final change.
    pub fn clear_presence(&mut self) {
        self.ctx.clear_presence();
    }

    // ---- plumbing --------------------------------------------------------

    fn apply(&mut self, op: Operation) -> Result<(), DocError> {
        op.execute(self.root, None)?;
        self.ctx.push(op);
        Ok(())
    }

    fn object_and_key(&self, path: &str) -> Result<(TimeTicket, SmartString), DocError> {
        let (parent_path, key) = path
            .rsplit_once('.')
            .ok_or_else(|| DocError::InvalidArgument(format!("bad path {path:?}")))?;
        if key.is_empty() {
            return Err(DocError::InvalidArgument(format!("bad path {path:?}")));
        }
        let parent = self.root.resolve_path(parent_path)?;
        if !matches!(self.root.elem(parent).content, Content::Object(_)) {
            return Err(DocError::InvalidArgument(format!("{parent_path} is not an object")));
        }
        Ok((self.root.elem(parent).created_at, key.into()))
    }

    fn array_at(&self, path: &str) -> Result<(TimeTicket, ElemId), DocError> {
        let id = self.root.resolve_path(path)?;
        if !matches!(self.root.elem(id).content, Content::Array(_)) {
            return Err(DocError::InvalidArgument(format!("{path} is not an array")));
        }
        Ok((self.root.elem(id).created_at, id))
    }

    fn text_at(&self, path: &str) -> Result<(TimeTicket, &CrdtText), DocError> {
        let id = self.root.resolve_path(path)?;
        match &self.root.elem(id).content {
            Content::Text(t) => Ok((self.root.elem(id).created_at, t)),
            _ => Err(DocError::InvalidArgument(format!("{path} is not a text"))),
        }
    }

    fn live_child(&self, arr: ElemId, index: usize) -> Result<ElemId, DocError> {
        self.root
            .elem(arr)
            .as_array()
            .expect("checked array")
            .iter()
            .filter(|&id| !self.root.elem(id).is_removed())
            .nth(index)
            .ok_or_else(|| DocError::InvalidArgument(format!("no array item at index {index}")))
    }
}

/// Turn user JSON into a payload, issuing a creation ticket per element.
/// Shared with undo, which rebuilds snapshots the same way.
pub(crate) fn build_payload(
    ctx: &mut ChangeContext,
    value: &Json,
) -> Result<(TimeTicket, ElementPayload), DocError> {
    let created_at = ctx.issue_time_ticket();
    let payload = match value {
        Json::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, child) in map {
                let (child_created, child_payload) = build_payload(ctx, child)?;
                entries.push(PayloadEntry {
                    key: key.as_str().into(),
                    created_at: child_created,
                    value: child_payload,
                });
            }
            ElementPayload::Object(entries)
        }
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for child in items {
                let (child_created, child_payload) = build_payload(ctx, child)?;
                out.push(PayloadItem { created_at: child_created, value: child_payload });
            }
            ElementPayload::Array(out)
        }
        other => ElementPayload::Primitive(Primitive::from_json(other).ok_or_else(|| {
            DocError::InvalidArgument(format!("unrepresentable JSON value {other}"))
        })?),
    };
    Ok((created_at, payload))
}
