//! Rich text: a split list of string chunks, each carrying a LWW attribute
//! map.
//!
//! The edit path is ordered contractually: split at the range end, split at
//! the range start, causally filter the blocks in between, report visible
//! changes in pre-deletion coordinates, tombstone, then insert. Styling
//! follows the same split pattern but only touches attribute maps.

use serde_json::json;
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

use crate::crdt::rga_split::{
    EditOutcome, RgaSplitNodeId, RgaSplitPos, RgaTreeSplit, SplitValue,
};
use crate::crdt::root::{DataSize, SizeDelta};
use crate::error::DocError;
use crate::rht::{utf16_len, Rht};
use crate::splay::NIL;
use crate::time::{Lamport, TimeTicket, VersionVector, TICKET_SIZE};

/// An attribute write: `Some` sets, `None` removes the key.
pub type AttrEntry = (SmartString, Option<SmartString>);

/// One chunk of text: content plus its attributes.
#[derive(Debug, Clone, Default)]
pub struct TextValue {
    pub content: SmartString,
    pub attrs: Rht,
}

impl TextValue {
    pub fn new(content: &str) -> Self {
        TextValue { content: content.into(), attrs: Rht::new() }
    }
}

impl SplitValue for TextValue {
    fn len(&self) -> usize {
        str_indices::chars::count(&self.content)
    }

    fn split_off(&mut self, at: usize) -> Self {
        let byte_at = str_indices::chars::to_byte_idx(&self.content, at);
        let tail = self.content.split_off(byte_at);
        TextValue {
            content: tail,
            // Both halves keep the attributes the block had when it split.
            attrs: self.attrs.clone(),
        }
    }

    fn data_size(&self) -> DataSize {
        let attrs = self.attrs.data_size();
        DataSize {
            data: 2 * utf16_len(&self.content) as i64 + attrs.data,
            meta: attrs.meta,
        }
    }
}

/// A displaced attribute write, reported for garbage registration.
#[derive(Debug, Clone)]
pub struct AttrGarbage {
    pub node: RgaSplitNodeId,
    pub key: SmartString,
    pub updated_at: TimeTicket,
    pub removed_at: TimeTicket,
}

/// One styled span, in current index coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleChange {
    pub from: usize,
    pub to: usize,
    pub attrs: Vec<AttrEntry>,
}

/// Undo material: the span of one block and the attribute values it carried
/// before this style landed.
#[derive(Debug, Clone)]
pub struct StyleReverse {
    pub from: RgaSplitPos,
    pub to: RgaSplitPos,
    pub attrs: Vec<AttrEntry>,
}

#[derive(Debug, Default)]
pub struct StyleOutcome {
    pub changes: SmallVec<[StyleChange; 2]>,
    pub garbage: SmallVec<[AttrGarbage; 2]>,
    /// Tombstone halves created by boundary splits, with their removal
    /// tickets; they need garbage pairs like any other tombstone.
    pub node_garbage: SmallVec<[(RgaSplitNodeId, TimeTicket); 2]>,
    pub reverse: SmallVec<[StyleReverse; 2]>,
    pub diff: SizeDelta,
}

#[derive(Debug, Clone, Default)]
pub struct CrdtText {
    rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    pub fn index_to_pos(&self, index: usize) -> Result<RgaSplitPos, DocError> {
        self.rga.index_to_pos(index)
    }

    pub fn pos_to_index(&mut self, pos: RgaSplitPos, prefer_left: bool) -> Result<usize, DocError> {
        self.rga.pos_to_index(pos, prefer_left)
    }

    /// Capture both ends of an index range as positions.
    pub fn pos_range(&self, from: usize, to: usize) -> Result<(RgaSplitPos, RgaSplitPos), DocError> {
        if from > to {
            return Err(DocError::InvalidArgument(format!("range {from}..{to} is inverted")));
        }
        Ok((self.index_to_pos(from)?, self.index_to_pos(to)?))
    }

    /// Replace `[from, to)` with `content` (either side may be empty).
    /// Inserted chunks are born with `attrs` already set at `edited_at`.
    pub fn edit(
        &mut self,
        from: RgaSplitPos,
        to: RgaSplitPos,
        edited_at: &TimeTicket,
        content: &str,
        attrs: &[(SmartString, SmartString)],
        version_vector: Option<&VersionVector>,
    ) -> Result<EditOutcome<TextValue>, DocError> {
        let value = if content.is_empty() {
            None
        } else {
            let mut value = TextValue::new(content);
            for (key, val) in attrs {
                value.attrs.set(key, val, *edited_at);
            }
            Some(value)
        };
        self.rga.edit(from, to, edited_at, value, version_vector)
    }

    /// Write attributes on every causally-visible block in `[from, to)`.
    /// `None` values remove their key.
    pub fn style(
        &mut self,
        from: RgaSplitPos,
        to: RgaSplitPos,
        edited_at: &TimeTicket,
        attrs: &[AttrEntry],
        version_vector: Option<&VersionVector>,
    ) -> Result<StyleOutcome, DocError> {
        let mut out = StyleOutcome::default();

        let to_anchor = self.rga.find_node_with_split(to, edited_at)?;
        let to_right = to_anchor.right;
        out.diff += to_anchor.diff;
        out.node_garbage.extend(to_anchor.tombstone_half);
        let from_anchor = self.rga.find_node_with_split(from, edited_at)?;
        let from_right = from_anchor.right;
        out.diff += from_anchor.diff;
        out.node_garbage.extend(from_anchor.tombstone_half);

        let mut targets: SmallVec<[u32; 4]> = SmallVec::new();
        let mut cur = from_right;
        while cur != to_right && cur != NIL {
            targets.push(cur);
            cur = self.rga.next_idx(cur);
        }

        let client_lamport = |vv: Option<&VersionVector>, node: &RgaSplitNodeId| -> Lamport {
            match vv {
                Some(vv) => vv.get(&node.created_at.actor),
                None => Lamport::MAX,
            }
        };

        for idx in targets {
            let (id, content_len) = {
                let node = self.rga.node(idx);
                (node.id, node.content_len())
            };
            if !self
                .rga
                .node(idx)
                .can_style(edited_at, client_lamport(version_vector, &id))
            {
                continue;
            }

            let mut old_attrs: Vec<AttrEntry> = Vec::new();
            for (key, new_value) in attrs {
                let old: Option<SmartString> =
                    self.rga.node(idx).value.attrs.get(key).map(Into::into);

                match new_value {
                    Some(value) => {
                        let displaced =
                            self.rga.node_mut(idx).value.attrs.set(key, value, *edited_at);
                        let won = displaced.is_some()
                            || (old.is_none()
                                && self.rga.node(idx).value.attrs.get(key)
                                    == Some(value.as_str()));
                        if let Some(old_node) = displaced {
                            let tomb = old_node.data_size();
                            out.diff.live -=
                                DataSize { data: tomb.data, meta: tomb.meta - TICKET_SIZE };
                            out.diff.gc += tomb;
                            out.garbage.push(AttrGarbage {
                                node: id,
                                key: old_node.key,
                                updated_at: old_node.updated_at,
                                removed_at: *edited_at,
                            });
                        }
                        if won {
                            out.diff.live += DataSize {
                                data: 2 * (utf16_len(key) + utf16_len(value)) as i64,
                                meta: TICKET_SIZE,
                            };
                            old_attrs.push((key.clone(), old));
                        }
                    }
                    None => {
                        if let Some(marker) =
                            self.rga.node_mut(idx).value.attrs.remove(key, *edited_at)
                        {
                            let live_size = DataSize {
                                data: marker.data_size().data,
                                meta: TICKET_SIZE,
                            };
                            out.diff.live -= live_size;
                            out.diff.gc += marker.data_size();
                            out.garbage.push(AttrGarbage {
                                node: id,
                                key: key.clone(),
                                updated_at: marker.updated_at,
                                removed_at: *edited_at,
                            });
                            old_attrs.push((key.clone(), old));
                        }
                    }
                }
            }

            if !old_attrs.is_empty() {
                out.reverse.push(StyleReverse {
                    from: RgaSplitPos { id, relative_offset: 0 },
                    to: RgaSplitPos { id, relative_offset: content_len as u32 },
                    attrs: old_attrs,
                });
            }

            let (start, end) = self.rga.index_range_of(idx);
            if start < end {
                out.changes.push(StyleChange { from: start, to: end, attrs: attrs.to_vec() });
            }
        }

        Ok(out)
    }

    pub fn purge_node(&mut self, id: &RgaSplitNodeId) -> Result<DataSize, DocError> {
        self.rga.purge(id)
    }

    pub fn purge_attr(
        &mut self,
        node: &RgaSplitNodeId,
        key: &str,
        updated_at: &TimeTicket,
    ) -> Result<DataSize, DocError> {
        let idx = self
            .rga
            .find_node(node)
            .ok_or_else(|| DocError::unknown_element(&format!("{node:?}")))?;
        self.rga
            .node_mut(idx)
            .value
            .attrs
            .purge(key, updated_at)
            .ok_or_else(|| DocError::unknown_element(&format!("attr {key:?} of {node:?}")))
    }

    /// The visible content as a plain string.
    #[allow(clippy::inherent_to_string)]
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for (_, node) in self.rga.iter() {
            if !node.is_removed() {
                out.push_str(&node.value.content);
            }
        }
        out
    }

    /// Deterministic JSON: chunks in document order, attributes sorted
    /// within each chunk. Adjacent chunks carrying identical attributes are
    /// merged, so block-split boundaries (which depend on edit history, not
    /// on converged content) never show through.
    pub fn to_sorted_json(&self) -> String {
        let mut runs: Vec<(String, String)> = Vec::new();
        for (idx, node) in self.rga.iter() {
            if idx == self.rga.head_idx() || node.is_removed() {
                continue;
            }
            let attrs = node.value.attrs.to_sorted_json();
            match runs.last_mut() {
                Some((run_attrs, content)) if *run_attrs == attrs => {
                    content.push_str(&node.value.content);
                }
                _ => runs.push((attrs, node.value.content.to_string())),
            }
        }

        let mut out = String::from("[");
        for (i, (attrs, content)) in runs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if attrs == "{}" {
                out.push_str(&format!("{{\"val\":{}}}", json!(content.as_str())));
            } else {
                out.push_str(&format!("{{\"attrs\":{},\"val\":{}}}", attrs, json!(content.as_str())));
            }
        }
        out.push(']');
        out
    }

    /// Live + tombstone byte totals for the accounting invariant.
    pub fn data_size(&self) -> SizeDelta {
        self.rga.data_size()
    }

    #[allow(unused)]
    pub(crate) fn dbg_check(&self) {
        self.rga.dbg_check();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::ActorId;

    fn actor(n: u8) -> ActorId {
        let mut bytes = [0u8; 16];
        bytes[15] = n;
        ActorId::from_bytes(bytes)
    }

    fn ticket(lamport: u64, delimiter: u32, a: u8) -> TimeTicket {
        TimeTicket::new(lamport, delimiter, actor(a))
    }

    fn edit(
        text: &mut CrdtText,
        from: usize,
        to: usize,
        content: &str,
        at: TimeTicket,
    ) -> EditOutcome<TextValue> {
        let (f, t) = text.pos_range(from, to).unwrap();
        text.edit(f, t, &at, content, &[], None).unwrap()
    }

    #[test]
    fn insert_and_read_back() {
        let mut text = CrdtText::new();
        edit(&mut text, 0, 0, "hello", ticket(1, 1, 1));
        edit(&mut text, 5, 5, " world", ticket(2, 1, 1));
        assert_eq!(text.to_string(), "hello world");
        assert_eq!(text.len(), 11);
        text.dbg_check();
    }

    #[test]
    fn edit_reports_changes() {
        let mut text = CrdtText::new();
        edit(&mut text, 0, 0, "hello", ticket(1, 1, 1));

        let outcome = edit(&mut text, 1, 4, "uzza", ticket(2, 1, 1));
        assert_eq!(text.to_string(), "huzzao");
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].from, 1);
        assert_eq!(outcome.changes[0].to, 4);
        assert_eq!(outcome.changes[0].value.as_ref().unwrap().content, "uzza");
        assert_eq!(outcome.removed_values.len(), 1);
        assert_eq!(outcome.removed_values[0].content, "ell");
        text.dbg_check();
    }

    #[test]
    fn index_pos_roundtrip_after_edits() {
        let mut text = CrdtText::new();
        edit(&mut text, 0, 0, "abcdef", ticket(1, 1, 1));
        edit(&mut text, 2, 4, "", ticket(2, 1, 1));
        edit(&mut text, 1, 1, "XY", ticket(3, 1, 1));
        assert_eq!(text.to_string(), "aXYbef");

        for i in 0..=text.len() {
            let pos = text.index_to_pos(i).unwrap();
            assert_eq!(text.pos_to_index(pos, true).unwrap(), i, "index {i}");
        }
    }

    #[test]
    fn style_and_reverse_capture() {
        let mut text = CrdtText::new();
        edit(&mut text, 0, 0, "abc", ticket(1, 1, 1));

        let (f, t) = text.pos_range(0, 3).unwrap();
        let out = text
            .style(f, t, &ticket(2, 1, 1), &[("bold".into(), Some("true".into()))], None)
            .unwrap();
        assert_eq!(out.changes.len(), 1);
        assert_eq!((out.changes[0].from, out.changes[0].to), (0, 3));
        assert!(out.garbage.is_empty());
        // Key was previously absent.
        assert_eq!(out.reverse.len(), 1);
        assert_eq!(out.reverse[0].attrs, vec![("bold".into(), None)]);

        // Restyle half the range; the split halves report separately.
        let (f, t) = text.pos_range(0, 2).unwrap();
        let out = text
            .style(f, t, &ticket(3, 1, 1), &[("bold".into(), Some("false".into()))], None)
            .unwrap();
        assert_eq!(out.garbage.len(), 1);
        assert_eq!(out.reverse[0].attrs, vec![("bold".into(), Some("true".into()))]);
        assert_eq!(
            text.to_sorted_json(),
            "[{\"attrs\":{\"bold\":\"false\"},\"val\":\"ab\"},{\"attrs\":{\"bold\":\"true\"},\"val\":\"c\"}]"
        );
    }

    #[test]
    fn stale_style_is_gated_by_version_vector() {
        let mut text = CrdtText::new();
        // Created by actor 1 at lamport 5.
        edit(&mut text, 0, 0, "abc", ticket(5, 1, 1));

        // Styler at lamport 10 who has only seen actor 1 up to lamport 3.
        let stale_vv: VersionVector = [(actor(1), 3u64)].into_iter().collect();
        let (f, t) = text.pos_range(0, 3).unwrap();
        let out = text
            .style(f, t, &ticket(10, 1, 2), &[("b".into(), Some("1".into()))], Some(&stale_vv))
            .unwrap();
        assert!(out.changes.is_empty());

        // Same style, but the author had seen lamport 5.
        let seen_vv: VersionVector = [(actor(1), 5u64)].into_iter().collect();
        let (f, t) = text.pos_range(0, 3).unwrap();
        let out = text
            .style(f, t, &ticket(10, 2, 2), &[("b".into(), Some("1".into()))], Some(&seen_vv))
            .unwrap();
        assert_eq!(out.changes.len(), 1);
    }
}
