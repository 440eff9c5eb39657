//! The operation taxonomy.
//!
//! Every operation addresses its target container by creation ticket
//! (`parent`) and carries its own ticket (`executed_at`). Executing one
//! mutates a [`CrdtRoot`], settles the size ledger, registers garbage, and
//! reports two things upward: user-visible op infos (tagged with JSON
//! paths, for events) and a reverse trail for undo where a stable inverse
//! exists.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

use crate::crdt::rga_split::RgaSplitPos;
use crate::crdt::root::{CrdtRoot, GcChild};
use crate::crdt::text::AttrEntry;
use crate::crdt::{Content, ElementPayload};
use crate::error::DocError;
use crate::time::{TimeTicket, VersionVector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// `object[key] = value`.
    Set {
        parent: TimeTicket,
        key: SmartString,
        created_at: TimeTicket,
        value: ElementPayload,
        executed_at: TimeTicket,
    },
    /// Insert into an array after the sibling created at `prev_created`
    /// (the initial ticket addresses the array head).
    Add {
        parent: TimeTicket,
        prev_created: TimeTicket,
        created_at: TimeTicket,
        value: ElementPayload,
        executed_at: TimeTicket,
    },
    /// Reposition an array element.
    Move {
        parent: TimeTicket,
        prev_created: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Tombstone a child element.
    Remove {
        parent: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    Increase {
        parent: TimeTicket,
        value: i64,
        executed_at: TimeTicket,
    },
    /// Replace a text range, optionally inserting content with attributes.
    Edit {
        parent: TimeTicket,
        from: RgaSplitPos,
        to: RgaSplitPos,
        content: SmartString,
        attributes: Vec<(SmartString, SmartString)>,
        executed_at: TimeTicket,
    },
    /// Write (or remove, via `None`) attributes across a text range.
    Style {
        parent: TimeTicket,
        from: RgaSplitPos,
        to: RgaSplitPos,
        attributes: Vec<AttrEntry>,
        executed_at: TimeTicket,
    },
    /// Replace the array element created at `created_at` with a new value.
    ArraySet {
        parent: TimeTicket,
        created_at: TimeTicket,
        new_created_at: TimeTicket,
        value: ElementPayload,
        executed_at: TimeTicket,
    },
}

/// What one applied operation looks like from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct OpInfo {
    pub path: String,
    pub kind: OpInfoKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpInfoKind {
    Set { key: SmartString },
    Add { index: usize },
    Move { index: usize },
    Remove { key: Option<SmartString>, index: Option<usize> },
    Increase { value: i64 },
    Edit { from: usize, to: usize, content: SmartString },
    Style { from: usize, to: usize, attributes: Vec<AttrEntry> },
    ArraySet { index: usize },
}

/// An inverse recorded while executing, replayed by undo with fresh tickets.
/// Index- and snapshot-based on purpose: the elements an undo will touch may
/// differ from the ones the original op touched once remote changes land.
#[derive(Debug, Clone, PartialEq)]
pub enum ReverseOp {
    /// Restore `object[key]` to a JSON snapshot.
    Set { parent: TimeTicket, key: SmartString, value: Json },
    /// Remove the element created at `created_at`.
    Remove { parent: TimeTicket, created_at: TimeTicket },
    Increase { parent: TimeTicket, value: i64 },
    /// Replace `[from, to)` with earlier content.
    Edit { parent: TimeTicket, from: usize, to: usize, content: SmartString },
    /// Restore attribute values across one block's span.
    Style { parent: TimeTicket, from: RgaSplitPos, to: RgaSplitPos, attrs: Vec<AttrEntry> },
    /// Restore presence keys to earlier values.
    Presence { entries: crate::presence::PresenceData },
}

#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub op_infos: SmallVec<[OpInfo; 2]>,
    pub reverse_ops: SmallVec<[ReverseOp; 1]>,
}

impl Operation {
    pub fn executed_at(&self) -> &TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::ArraySet { executed_at, .. } => executed_at,
        }
    }

    /// The ticket of the element whose lifetime bounds this op.
    pub fn effected_created_at(&self) -> &TimeTicket {
        match self {
            Operation::Set { parent, .. }
            | Operation::Add { parent, .. }
            | Operation::Move { parent, .. }
            | Operation::Remove { parent, .. }
            | Operation::Increase { parent, .. }
            | Operation::Edit { parent, .. }
            | Operation::Style { parent, .. }
            | Operation::ArraySet { parent, .. } => parent,
        }
    }

    /// Apply against a root. `version_vector` is the author's causal
    /// knowledge for remote changes; local application passes `None` and is
    /// treated as having seen everything.
    pub fn execute(
        &self,
        root: &mut CrdtRoot,
        version_vector: Option<&VersionVector>,
    ) -> Result<ExecutionResult, DocError> {
        let mut result = ExecutionResult::default();
        match self {
            Operation::Set { parent, key, created_at, value, executed_at } => {
                let obj_id = find_kind(root, parent, "object")?;

                let prev = root
                    .elem(obj_id)
                    .as_object()
                    .expect("checked object")
                    .get(key)
                    .filter(|&p| !root.elem(p).is_removed());
                let reverse = match prev {
                    Some(p) => ReverseOp::Set {
                        parent: *parent,
                        key: key.clone(),
                        value: root.json_of(p),
                    },
                    None => ReverseOp::Remove { parent: *parent, created_at: *created_at },
                };

                let value_id = root.materialize(value, *created_at, obj_id);
                root.object_set(obj_id, key, value_id, executed_at);

                result.op_infos.push(OpInfo {
                    path: root.path_of(obj_id)?,
                    kind: OpInfoKind::Set { key: key.clone() },
                });
                result.reverse_ops.push(reverse);
            }

            Operation::Add { parent, prev_created, created_at, value, executed_at } => {
                let arr_id = find_kind(root, parent, "array")?;
                if root.find_by_created_at(created_at).is_some() {
                    // Already materialized: this change was applied before.
                    return Ok(result);
                }
                let value_id = root.materialize(value, *created_at, arr_id);
                root.array_insert_after(arr_id, prev_created, value_id, executed_at)?;

                let index = root.array_live_index_of(arr_id, value_id).unwrap_or(0);
                result.op_infos.push(OpInfo {
                    path: root.path_of(arr_id)?,
                    kind: OpInfoKind::Add { index },
                });
                result
                    .reverse_ops
                    .push(ReverseOp::Remove { parent: *parent, created_at: *created_at });
            }

            Operation::Move { parent, prev_created, created_at, executed_at } => {
                let arr_id = find_kind(root, parent, "array")?;
                let moved = root.array_move_after(arr_id, prev_created, created_at, executed_at)?;
                if moved {
                    let target = root
                        .find_by_created_at(created_at)
                        .ok_or_else(|| DocError::unknown_element(&format!("{created_at:?}")))?;
                    let index = root.array_live_index_of(arr_id, target).unwrap_or(0);
                    result.op_infos.push(OpInfo {
                        path: root.path_of(arr_id)?,
                        kind: OpInfoKind::Move { index },
                    });
                }
            }

            Operation::Remove { parent, created_at, executed_at } => {
                let container = root
                    .find_by_created_at(parent)
                    .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
                let target = root
                    .find_by_created_at(created_at)
                    .ok_or_else(|| DocError::unknown_element(&format!("{created_at:?}")))?;

                let (key, index, reverse) = match &root.elem(container).content {
                    Content::Object(o) => {
                        let key: Option<SmartString> = o.key_of(target).map(Into::into);
                        let reverse = key.as_ref().map(|k| ReverseOp::Set {
                            parent: *parent,
                            key: k.clone(),
                            value: root.json_of(target),
                        });
                        (key, None, reverse)
                    }
                    Content::Array(_) => {
                        (None, root.array_live_index_of(container, target), None)
                    }
                    _ => {
                        return Err(DocError::InvalidArgument(
                            "remove target's parent is not a container".into(),
                        ))
                    }
                };

                if root.remove_child(target, executed_at) {
                    result.op_infos.push(OpInfo {
                        path: root.path_of(container)?,
                        kind: OpInfoKind::Remove { key, index },
                    });
                    if let Some(reverse) = reverse {
                        result.reverse_ops.push(reverse);
                    }
                }
            }

            Operation::Increase { parent, value, .. } => {
                let id = root
                    .find_by_created_at(parent)
                    .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
                let counter = root
                    .elem_mut(id)
                    .as_counter_mut()
                    .ok_or_else(|| DocError::InvalidArgument("increase on non-counter".into()))?;
                counter.increase(*value);

                result.op_infos.push(OpInfo {
                    path: root.path_of(id)?,
                    kind: OpInfoKind::Increase { value: *value },
                });
                result
                    .reverse_ops
                    .push(ReverseOp::Increase { parent: *parent, value: -*value });
            }

            Operation::Edit { parent, from, to, content, attributes, executed_at } => {
                let text_id = root
                    .find_by_created_at(parent)
                    .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
                let outcome = {
                    let text = root
                        .elem_mut(text_id)
                        .as_text_mut()
                        .ok_or_else(|| DocError::InvalidArgument("edit on non-text".into()))?;
                    text.edit(*from, *to, executed_at, content, attributes, version_vector)?
                };
                root.acc(outcome.diff);
                for (node, removed_at) in &outcome.garbage {
                    root.register_gc_pair(
                        GcChild::TextNode { text: *parent, node: *node },
                        *removed_at,
                    );
                }

                let path = root.path_of(text_id)?;
                for change in &outcome.changes {
                    result.op_infos.push(OpInfo {
                        path: path.clone(),
                        kind: OpInfoKind::Edit {
                            from: change.from,
                            to: change.to,
                            content: change
                                .value
                                .as_ref()
                                .map(|v| v.content.clone())
                                .unwrap_or_default(),
                        },
                    });
                }

                if !outcome.changes.is_empty() {
                    let start = outcome.changes.iter().map(|c| c.from).min().unwrap();
                    let inserted_len = str_indices::chars::count(content);
                    let mut removed = SmartString::new();
                    for value in &outcome.removed_values {
                        removed.push_str(&value.content);
                    }
                    result.reverse_ops.push(ReverseOp::Edit {
                        parent: *parent,
                        from: start,
                        to: start + inserted_len,
                        content: removed,
                    });
                }
            }

            Operation::Style { parent, from, to, attributes, executed_at } => {
                let text_id = root
                    .find_by_created_at(parent)
                    .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
                let outcome = {
                    let text = root
                        .elem_mut(text_id)
                        .as_text_mut()
                        .ok_or_else(|| DocError::InvalidArgument("style on non-text".into()))?;
                    text.style(*from, *to, executed_at, attributes, version_vector)?
                };
                root.acc(outcome.diff);
                for g in outcome.garbage {
                    root.register_gc_pair(
                        GcChild::TextAttr {
                            text: *parent,
                            node: g.node,
                            key: g.key,
                            updated_at: g.updated_at,
                        },
                        g.removed_at,
                    );
                }
                for (node, removed_at) in &outcome.node_garbage {
                    root.register_gc_pair(
                        GcChild::TextNode { text: *parent, node: *node },
                        *removed_at,
                    );
                }

                let path = root.path_of(text_id)?;
                for change in &outcome.changes {
                    result.op_infos.push(OpInfo {
                        path: path.clone(),
                        kind: OpInfoKind::Style {
                            from: change.from,
                            to: change.to,
                            attributes: change.attrs.clone(),
                        },
                    });
                }
                for r in outcome.reverse {
                    result.reverse_ops.push(ReverseOp::Style {
                        parent: *parent,
                        from: r.from,
                        to: r.to,
                        attrs: r.attrs,
                    });
                }
            }

            Operation::ArraySet { parent, created_at, new_created_at, value, executed_at } => {
                let arr_id = find_kind(root, parent, "array")?;
                if root.find_by_created_at(new_created_at).is_some() {
                    return Ok(result);
                }
                let target = root
                    .find_by_created_at(created_at)
                    .ok_or_else(|| DocError::unknown_element(&format!("{created_at:?}")))?;
                let index = root.array_live_index_of(arr_id, target);

                let value_id = root.materialize(value, *new_created_at, arr_id);
                root.array_insert_after(arr_id, created_at, value_id, executed_at)?;
                root.remove_child(target, executed_at);

                result.op_infos.push(OpInfo {
                    path: root.path_of(arr_id)?,
                    kind: OpInfoKind::ArraySet { index: index.unwrap_or(0) },
                });
            }
        }
        Ok(result)
    }
}

fn find_kind(
    root: &CrdtRoot,
    parent: &TimeTicket,
    kind: &str,
) -> Result<crate::crdt::ElemId, DocError> {
    let id = root
        .find_by_created_at(parent)
        .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
    if root.elem(id).content.kind() != kind {
        return Err(DocError::InvalidArgument(format!(
            "expected {kind}, found {} at {parent:?}",
            root.elem(id).content.kind()
        )));
    }
    Ok(id)
}
