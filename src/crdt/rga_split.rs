//! The block-based split list behind rich text.
//!
//! Content lives in blocks ("nodes") strung on a doubly linked list in
//! document order. Blocks never merge, but any edit can split one; both
//! halves keep the original creation ticket and differ only in their offset.
//! Tombstoned blocks stay linked (at weight zero) until the garbage
//! collector proves every peer has seen the removal.
//!
//! Node storage is an arena of slots addressed by `NodeIdx`. The four
//! neighbor links (document order and split genealogy) are slot indexes, so
//! the whole structure is a plain `Clone` - that's what makes the document's
//! speculative copy affordable.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::crdt::root::{DataSize, SizeDelta};
use crate::error::DocError;
use crate::llrb::Llrb;
use crate::splay::{IndexTree, NodeIdx, NIL};
use crate::time::{ActorId, Lamport, TimeTicket, VersionVector, TICKET_SIZE};

/// Identity of a block: the ticket of the edit that inserted it, plus the
/// character offset this block starts at within that insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RgaSplitNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl RgaSplitNodeId {
    pub const HEAD: RgaSplitNodeId = RgaSplitNodeId { created_at: TimeTicket::INITIAL, offset: 0 };
}

/// A position in the list, expressed as an offset relative to a block that
/// existed when the position was captured. Splits that happen later don't
/// invalidate it: the floor lookup re-resolves it to the surviving block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgaSplitPos {
    pub id: RgaSplitNodeId,
    pub relative_offset: u32,
}

impl RgaSplitPos {
    pub fn absolute_id(&self) -> RgaSplitNodeId {
        RgaSplitNodeId {
            created_at: self.id.created_at,
            offset: self.id.offset + self.relative_offset,
        }
    }
}

/// What a block holds. Text uses a string chunk plus attributes; the list
/// itself only cares about length, splitting, and accounting.
pub trait SplitValue: Clone + Default + Debug {
    /// Logical length in characters.
    fn len(&self) -> usize;
    /// Split at `at`, keeping `[0, at)` and returning `[at, len)`.
    fn split_off(&mut self, at: usize) -> Self;
    fn data_size(&self) -> DataSize;
}

#[derive(Debug, Clone)]
pub struct SplitNode<V> {
    pub id: RgaSplitNodeId,
    pub value: V,
    pub removed_at: Option<TimeTicket>,
    prev: NodeIdx,
    next: NodeIdx,
    ins_prev: NodeIdx,
    ins_next: NodeIdx,
}

impl<V: SplitValue> SplitNode<V> {
    fn new(id: RgaSplitNodeId, value: V) -> Self {
        SplitNode {
            id,
            value,
            removed_at: None,
            prev: NIL,
            next: NIL,
            ins_prev: NIL,
            ins_next: NIL,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    pub fn content_len(&self) -> usize {
        self.value.len()
    }

    pub fn visible_len(&self) -> usize {
        if self.is_removed() { 0 } else { self.value.len() }
    }

    /// The lamport this node's author had been seen at by the editor, per
    /// the editor's version vector. Local edits pass no vector and see
    /// everything.
    ///
    /// A node may be deleted only if the editor had seen its creation, and
    /// any prior removal is older than this edit.
    pub fn can_delete(&self, edited_at: &TimeTicket, client_lamport: Lamport) -> bool {
        self.id.created_at.lamport <= client_lamport
            && match &self.removed_at {
                None => true,
                Some(removed_at) => edited_at.after(removed_at),
            }
    }

    /// Same causal gate, for styling.
    pub fn can_style(&self, edited_at: &TimeTicket, client_lamport: Lamport) -> bool {
        self.can_delete(edited_at, client_lamport)
    }

    pub fn data_size(&self) -> DataSize {
        let v = self.value.data_size();
        DataSize {
            data: v.data,
            meta: v.meta + TICKET_SIZE + if self.is_removed() { TICKET_SIZE } else { 0 },
        }
    }
}

/// A visible change produced by one edit, in pre-edit index coordinates for
/// deletions and post-edit coordinates for the insertion point.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<V> {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub value: Option<V>,
}

/// The insertion gap an edit resolved to: the left anchor, its current
/// right neighbor (NIL at the end), split accounting, and - when the split
/// cut a tombstone - the new half that needs garbage registration.
#[derive(Debug)]
pub struct SplitAnchor {
    pub left: NodeIdx,
    pub right: NodeIdx,
    pub diff: SizeDelta,
    pub tombstone_half: Option<(RgaSplitNodeId, TimeTicket)>,
}

/// Everything an edit reports back.
#[derive(Debug)]
pub struct EditOutcome<V> {
    /// Caret position just after the edit.
    pub pos: RgaSplitPos,
    pub changes: SmallVec<[ValueChange<V>; 2]>,
    /// Tombstoned (or re-tombstoned) node ids with the removal ticket to
    /// register their garbage pair under. Splitting an existing tombstone
    /// contributes the new half here too, keyed by the original removal.
    pub garbage: SmallVec<[(RgaSplitNodeId, TimeTicket); 2]>,
    /// Values this edit made invisible, in document order. Feeds the undo
    /// trail; nodes that were already tombstones don't appear.
    pub removed_values: SmallVec<[V; 2]>,
    pub diff: SizeDelta,
}

#[derive(Debug, Clone)]
pub struct RgaTreeSplit<V: SplitValue> {
    nodes: Vec<Option<SplitNode<V>>>,
    free: Vec<NodeIdx>,
    head: NodeIdx,
    index: IndexTree,
    by_id: Llrb<RgaSplitNodeId, NodeIdx>,
}

impl<V: SplitValue> Default for RgaTreeSplit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SplitValue> RgaTreeSplit<V> {
    pub fn new() -> Self {
        let mut list = RgaTreeSplit {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            index: IndexTree::new(),
            by_id: Llrb::new(),
        };
        let head = list.alloc(SplitNode::new(RgaSplitNodeId::HEAD, V::default()));
        list.head = head;
        list.index.init_root(head, 0);
        list.by_id.set(RgaSplitNodeId::HEAD, head);
        list
    }

    fn alloc(&mut self, node: SplitNode<V>) -> NodeIdx {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            (self.nodes.len() - 1) as NodeIdx
        }
    }

    pub fn node(&self, idx: NodeIdx) -> &SplitNode<V> {
        self.nodes[idx as usize].as_ref().expect("vacant split node slot")
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut SplitNode<V> {
        self.nodes[idx as usize].as_mut().expect("vacant split node slot")
    }

    pub fn head_idx(&self) -> NodeIdx {
        self.head
    }

    pub fn next_idx(&self, idx: NodeIdx) -> NodeIdx {
        self.node(idx).next
    }

    /// Visible character count.
    pub fn len(&self) -> usize {
        self.index.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Document-order walk over every slot, head sentinel included.
    pub fn iter(&self) -> RgaIter<'_, V> {
        RgaIter { list: self, cur: self.head }
    }

    /// Exact-id lookup.
    pub fn find_node(&self, id: &RgaSplitNodeId) -> Option<NodeIdx> {
        self.by_id.get(id).copied()
    }

    /// Visible index -> position.
    pub fn index_to_pos(&self, index: usize) -> Result<RgaSplitPos, DocError> {
        let (idx, offset) = self.index.find(index).ok_or_else(|| {
            DocError::InvalidArgument(format!("index {index} out of range (len {})", self.len()))
        })?;
        let node = self.node(idx);
        Ok(RgaSplitPos { id: node.id, relative_offset: offset as u32 })
    }

    /// Position -> visible index. Tombstones collapse to their rank.
    pub fn pos_to_index(&mut self, pos: RgaSplitPos, prefer_left: bool) -> Result<usize, DocError> {
        let abs = pos.absolute_id();
        let idx = if prefer_left {
            self.find_floor_prefer_left(abs)?
        } else {
            self.find_floor(abs)?
        };
        let node = self.node(idx);
        let offset = if node.is_removed() { 0 } else { (abs.offset - node.id.offset) as usize };
        Ok(self.index.index_of(idx) + offset)
    }

    fn find_floor(&self, id: RgaSplitNodeId) -> Result<NodeIdx, DocError> {
        match self.by_id.floor(&id) {
            Some((key, idx)) if *key == id || key.created_at == id.created_at => Ok(*idx),
            _ => Err(DocError::unknown_element(&format!("{id:?}"))),
        }
    }

    /// Floor lookup that walks to the split ancestor when the target offset
    /// lands exactly on the floor node's own start. This is the `preferLeft`
    /// boundary tie-break: the position belongs to the block it was captured
    /// against, not the half split off it later.
    fn find_floor_prefer_left(&self, id: RgaSplitNodeId) -> Result<NodeIdx, DocError> {
        let mut idx = self.find_floor(id)?;
        let node = self.node(idx);
        if id.offset > 0 && id.offset == node.id.offset && node.ins_prev != NIL {
            idx = node.ins_prev;
        }
        Ok(idx)
    }

    /// Split the block at `rel_offset` characters in. No-op at either edge.
    /// Returns the accounting delta (one extra block's worth of metadata)
    /// and, when a tombstone was split, the new half's id and removal
    /// ticket so the caller can register it for collection.
    fn split_node(
        &mut self,
        idx: NodeIdx,
        rel_offset: u32,
    ) -> Result<(SizeDelta, Option<(RgaSplitNodeId, TimeTicket)>), DocError> {
        let (content_len, removed) = {
            let n = self.node(idx);
            (n.content_len(), n.is_removed())
        };
        if rel_offset as usize > content_len {
            return Err(DocError::InvalidArgument(format!(
                "split offset {rel_offset} exceeds block length {content_len}"
            )));
        }
        if rel_offset == 0 || rel_offset as usize == content_len {
            return Ok((SizeDelta::default(), None));
        }

        let size_before = self.node(idx).data_size();

        let new_node = {
            let n = self.node_mut(idx);
            let right_value = n.value.split_off(rel_offset as usize);
            let mut new_node = SplitNode::new(
                RgaSplitNodeId {
                    created_at: n.id.created_at,
                    offset: n.id.offset + rel_offset,
                },
                right_value,
            );
            // The newer half inherits the tombstone.
            new_node.removed_at = n.removed_at;
            new_node
        };
        let new_idx = self.insert_list_after(idx, new_node);

        // Rewire the split genealogy chain so the newer half points at the
        // older half, and whatever used to follow the older half follows the
        // new one.
        let old_ins_next = self.node(idx).ins_next;
        if old_ins_next != NIL {
            self.node_mut(old_ins_next).ins_prev = new_idx;
            self.node_mut(new_idx).ins_next = old_ins_next;
        }
        self.node_mut(new_idx).ins_prev = idx;
        self.node_mut(idx).ins_next = new_idx;

        let left_len = self.node(idx).visible_len();
        self.index.update_len(idx, left_len);

        let delta = (self.node(idx).data_size() + self.node(new_idx).data_size()) - size_before;
        Ok(if removed {
            let new_node = self.node(new_idx);
            let tomb = (new_node.id, new_node.removed_at.expect("split of a tombstone"));
            (SizeDelta { gc: delta, ..Default::default() }, Some(tomb))
        } else {
            (SizeDelta { live: delta, ..Default::default() }, None)
        })
    }

    /// Hook a node into the linked list, the rank index and the id index,
    /// right after `prev`.
    fn insert_list_after(&mut self, prev: NodeIdx, node: SplitNode<V>) -> NodeIdx {
        let visible = if node.removed_at.is_some() { 0 } else { node.value.len() };
        let id = node.id;
        let new_idx = self.alloc(node);

        let old_next = self.node(prev).next;
        self.node_mut(new_idx).prev = prev;
        self.node_mut(new_idx).next = old_next;
        self.node_mut(prev).next = new_idx;
        if old_next != NIL {
            self.node_mut(old_next).prev = new_idx;
        }

        self.index.insert_after(prev, new_idx, visible);
        self.by_id.set(id, new_idx);
        new_idx
    }

    /// Resolve `pos`, split the covering block there, then walk forward past
    /// blocks created after `edited_at`. Those are concurrent insertions the
    /// editor never saw; skipping them is the RGA tie-break that makes
    /// same-position insertions land identically everywhere.
    ///
    /// Returns the insertion gap (left anchor, right neighbor or NIL) and
    /// the split's accounting delta.
    pub fn find_node_with_split(
        &mut self,
        pos: RgaSplitPos,
        edited_at: &TimeTicket,
    ) -> Result<SplitAnchor, DocError> {
        let abs = pos.absolute_id();
        let mut idx = self.find_floor_prefer_left(abs)?;
        let rel_offset = abs.offset - self.node(idx).id.offset;
        let (diff, tombstone_half) = self.split_node(idx, rel_offset)?;

        while self.node(idx).next != NIL
            && self.node(self.node(idx).next).id.created_at.after(edited_at)
        {
            idx = self.node(idx).next;
        }
        Ok(SplitAnchor { left: idx, right: self.node(idx).next, diff, tombstone_half })
    }

    /// The edit primitive: delete `[from, to)` (causally gated), optionally
    /// insert `value` at `from`. See the step ordering in the module docs of
    /// `crdt::text` - it is contractual.
    pub fn edit(
        &mut self,
        from: RgaSplitPos,
        to: RgaSplitPos,
        edited_at: &TimeTicket,
        value: Option<V>,
        version_vector: Option<&VersionVector>,
    ) -> Result<EditOutcome<V>, DocError> {
        let mut diff = SizeDelta::default();
        let mut garbage: SmallVec<[(RgaSplitNodeId, TimeTicket); 2]> = SmallVec::new();

        // 1. Split at `to`, then at `from`.
        let to_anchor = self.find_node_with_split(to, edited_at)?;
        let to_right = to_anchor.right;
        diff += to_anchor.diff;
        garbage.extend(to_anchor.tombstone_half);
        let from_anchor = self.find_node_with_split(from, edited_at)?;
        let (from_left, from_right) = (from_anchor.left, from_anchor.right);
        diff += from_anchor.diff;
        garbage.extend(from_anchor.tombstone_half);

        // 2. Candidates strictly between the two split points.
        let mut candidates: SmallVec<[NodeIdx; 4]> = SmallVec::new();
        let mut cur = from_right;
        while cur != to_right && cur != NIL {
            candidates.push(cur);
            cur = self.node(cur).next;
        }

        // 3. Causal filter: an edit may only delete what its author had seen.
        let client_lamport = |vv: Option<&VersionVector>, actor: &ActorId| -> Lamport {
            match vv {
                Some(vv) => vv.get(actor),
                None => Lamport::MAX,
            }
        };
        let deletable: Vec<bool> = candidates
            .iter()
            .map(|&idx| {
                let node = self.node(idx);
                node.can_delete(edited_at, client_lamport(version_vector, &node.id.created_at.actor))
            })
            .collect();

        // 4. One ValueChange per maximal run of deletable candidates, in
        // pre-deletion index coordinates.
        let mut changes: SmallVec<[ValueChange<V>; 2]> = SmallVec::new();
        let mut run_start = None;
        for i in 0..=candidates.len() {
            let in_run = i < candidates.len() && deletable[i];
            match (run_start, in_run) {
                (None, true) => run_start = Some(i),
                (Some(start), false) => {
                    let first = candidates[start];
                    let last = candidates[i - 1];
                    let from_idx = self.index.index_of(first);
                    let to_idx = self.index.index_of(last) + self.node(last).visible_len();
                    if from_idx < to_idx {
                        changes.push(ValueChange {
                            actor: edited_at.actor,
                            from: from_idx,
                            to: to_idx,
                            value: None,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        // 5. Tombstone the deletable candidates and drop their weight.
        let mut removed_values: SmallVec<[V; 2]> = SmallVec::new();
        for (i, &idx) in candidates.iter().enumerate() {
            if !deletable[i] {
                continue;
            }
            let was_live = {
                let node = self.node_mut(idx);
                let was_live = node.removed_at.is_none();
                node.removed_at = Some(*edited_at);
                was_live
            };
            if was_live {
                removed_values.push(self.node(idx).value.clone());
                let size = self.node(idx).data_size();
                self.index.update_len(idx, 0);
                diff.live = diff.live - DataSize { data: size.data, meta: size.meta - TICKET_SIZE };
                diff.gc = diff.gc + size;
            }
            garbage.push((self.node(idx).id, *edited_at));
        }

        // 6. Insert, merging into the trailing change when they touch. A
        // node with this exact id already existing means the same change is
        // being replayed; inserting again would fork the block.
        let already_inserted = value
            .as_ref()
            .map(|_| {
                self.find_node(&RgaSplitNodeId { created_at: *edited_at, offset: 0 }).is_some()
            })
            .unwrap_or(false);
        let pos = if let (Some(value), false) = (value, already_inserted) {
            debug_assert!(value.len() > 0);
            let ins_id = RgaSplitNodeId { created_at: *edited_at, offset: 0 };
            let ins_len = value.len();
            let new_idx = self.insert_list_after(from_left, SplitNode::new(ins_id, value.clone()));
            diff.live += self.node(new_idx).data_size();

            let ins_index = self.index.index_of(new_idx);
            match changes.last_mut() {
                Some(last) if last.from == ins_index => last.value = Some(value),
                _ => changes.push(ValueChange {
                    actor: edited_at.actor,
                    from: ins_index,
                    to: ins_index,
                    value: Some(value),
                }),
            }
            RgaSplitPos { id: ins_id, relative_offset: ins_len as u32 }
        } else if already_inserted {
            let id = RgaSplitNodeId { created_at: *edited_at, offset: 0 };
            let idx = self.find_node(&id).expect("checked above");
            RgaSplitPos { id, relative_offset: self.node(idx).content_len() as u32 }
        } else if from_right != NIL {
            RgaSplitPos { id: self.node(from_right).id, relative_offset: 0 }
        } else {
            let n = self.node(from_left);
            RgaSplitPos { id: n.id, relative_offset: n.content_len() as u32 }
        };

        Ok(EditOutcome { pos, changes, garbage, removed_values, diff })
    }

    /// Visible index range currently occupied by a node. Empty for
    /// tombstones.
    pub fn index_range_of(&mut self, idx: NodeIdx) -> (usize, usize) {
        let from = self.index.index_of(idx);
        (from, from + self.node(idx).visible_len())
    }

    /// Physically drop a purged tombstone: out of both indexes, out of both
    /// chains, slot back on the free list. Returns its (gc) size.
    pub fn purge(&mut self, id: &RgaSplitNodeId) -> Result<DataSize, DocError> {
        let idx = *self
            .by_id
            .get(id)
            .ok_or_else(|| DocError::unknown_element(&format!("{id:?}")))?;
        if !self.node(idx).is_removed() {
            return Err(DocError::InvalidArgument("purging a live node".into()));
        }

        let size = self.node(idx).data_size();
        let node = self.nodes[idx as usize].take().expect("vacant split node slot");

        if node.prev != NIL {
            self.node_mut(node.prev).next = node.next;
        }
        if node.next != NIL {
            self.node_mut(node.next).prev = node.prev;
        }
        // Shortcut the split genealogy across the gap.
        if node.ins_prev != NIL {
            self.node_mut(node.ins_prev).ins_next = node.ins_next;
        }
        if node.ins_next != NIL {
            self.node_mut(node.ins_next).ins_prev = node.ins_prev;
        }

        self.index.delete(idx);
        self.by_id.remove(&node.id);
        self.free.push(idx);
        Ok(size)
    }

    /// Sum of live and tombstone sizes, for the accounting invariant.
    pub fn data_size(&self) -> SizeDelta {
        let mut out = SizeDelta::default();
        for (idx, node) in self.iter() {
            if idx == self.head {
                continue;
            }
            if node.is_removed() {
                out.gc += node.data_size();
            } else {
                out.live += node.data_size();
            }
        }
        out
    }

    /// Structure checker for tests and fuzzers.
    #[allow(unused)]
    pub(crate) fn dbg_check(&self) {
        self.index.dbg_check();
        let mut live = 0;
        let mut count = 0;
        let mut cur = self.head;
        let mut prev = NIL;
        while cur != NIL {
            let node = self.node(cur);
            assert_eq!(node.prev, prev);
            assert_eq!(self.by_id.get(&node.id), Some(&cur));
            live += node.visible_len();
            count += 1;
            prev = cur;
            cur = node.next;
        }
        assert_eq!(live, self.len());
        assert_eq!(count, self.by_id.len());
    }
}

pub struct RgaIter<'a, V: SplitValue> {
    list: &'a RgaTreeSplit<V>,
    cur: NodeIdx,
}

impl<'a, V: SplitValue> Iterator for RgaIter<'a, V> {
    type Item = (NodeIdx, &'a SplitNode<V>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let idx = self.cur;
        let node = self.list.node(idx);
        self.cur = node.next;
        Some((idx, node))
    }
}
