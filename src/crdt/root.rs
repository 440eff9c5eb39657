//! The document root: one arena of elements, the creation-ticket registry,
//! the garbage ledger, and the size accountant.
//!
//! Removal is two-phase. An operation tombstones an element (or a text
//! block, or an attribute write) and registers it here; the actual purge
//! happens in [`CrdtRoot::garbage_collect`], once the minimum synced version
//! vector proves every peer has observed the removal.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use humansize::{format_size_i, DECIMAL};
use log::debug;
use serde_json::Value as Json;
use smartstring::alias::String as SmartString;

use crate::crdt::rga_split::RgaSplitNodeId;
use crate::crdt::{Content, ElemId, Element, ElementPayload};
use crate::crdt::array::CrdtArray;
use crate::crdt::counter::CrdtCounter;
use crate::crdt::object::CrdtObject;
use crate::crdt::text::CrdtText;
use crate::error::DocError;
use crate::time::{TimeTicket, VersionVector, TICKET_SIZE};

/// Bytes of user data vs bytes of CRDT bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSize {
    pub data: i64,
    pub meta: i64,
}

impl DataSize {
    pub fn total(&self) -> i64 {
        self.data + self.meta
    }
}

impl Add for DataSize {
    type Output = DataSize;
    fn add(self, rhs: DataSize) -> DataSize {
        DataSize { data: self.data + rhs.data, meta: self.meta + rhs.meta }
    }
}

impl Sub for DataSize {
    type Output = DataSize;
    fn sub(self, rhs: DataSize) -> DataSize {
        DataSize { data: self.data - rhs.data, meta: self.meta - rhs.meta }
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        *self = *self + rhs;
    }
}

impl SubAssign for DataSize {
    fn sub_assign(&mut self, rhs: DataSize) {
        *self = *self - rhs;
    }
}

/// A change to the two size buckets, as produced by one mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeDelta {
    pub live: DataSize,
    pub gc: DataSize,
}

impl Add for SizeDelta {
    type Output = SizeDelta;
    fn add(self, rhs: SizeDelta) -> SizeDelta {
        SizeDelta { live: self.live + rhs.live, gc: self.gc + rhs.gc }
    }
}

impl AddAssign for SizeDelta {
    fn add_assign(&mut self, rhs: SizeDelta) {
        *self = *self + rhs;
    }
}

/// Running totals: what's visible vs what's awaiting collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocSize {
    pub live: DataSize,
    pub gc: DataSize,
}

impl DocSize {
    pub fn total(&self) -> i64 {
        self.live.total() + self.gc.total()
    }

    pub fn apply(&mut self, delta: SizeDelta) {
        self.live += delta.live;
        self.gc += delta.gc;
    }
}

impl fmt::Display for DocSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live {} (data {}, meta {}), gc {}",
            format_size_i(self.live.total(), DECIMAL),
            format_size_i(self.live.data, DECIMAL),
            format_size_i(self.live.meta, DECIMAL),
            format_size_i(self.gc.total(), DECIMAL),
        )
    }
}

/// Sub-element garbage: things smaller than an element that still need a
/// version-vector-guarded purge. Keyed by identity, so a newer removal of
/// the same child replaces the old entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GcChild {
    /// A tombstoned text block.
    TextNode { text: TimeTicket, node: RgaSplitNodeId },
    /// A displaced or removed attribute write on a text block.
    TextAttr {
        text: TimeTicket,
        node: RgaSplitNodeId,
        key: SmartString,
        updated_at: TimeTicket,
    },
}

impl GcChild {
    fn owner(&self) -> &TimeTicket {
        match self {
            GcChild::TextNode { text, .. } => text,
            GcChild::TextAttr { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrdtRoot {
    elements: Vec<Option<Element>>,
    free: Vec<ElemId>,
    root: ElemId,
    by_created_at: HashMap<TimeTicket, ElemId>,
    removed: HashSet<TimeTicket>,
    gc_pairs: HashMap<GcChild, TimeTicket>,
    doc_size: DocSize,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot {
    pub fn new() -> Self {
        let mut root = CrdtRoot {
            elements: Vec::new(),
            free: Vec::new(),
            root: 0,
            by_created_at: HashMap::new(),
            removed: HashSet::new(),
            gc_pairs: HashMap::new(),
            doc_size: DocSize::default(),
        };
        let elem = Element::new(TimeTicket::INITIAL, Content::Object(CrdtObject::new()));
        let size = elem.own_data_size();
        let id = root.alloc(elem);
        root.root = id;
        root.by_created_at.insert(TimeTicket::INITIAL, id);
        root.doc_size.live += size;
        root
    }

    fn alloc(&mut self, elem: Element) -> ElemId {
        if let Some(id) = self.free.pop() {
            self.elements[id as usize] = Some(elem);
            id
        } else {
            self.elements.push(Some(elem));
            (self.elements.len() - 1) as ElemId
        }
    }

    pub fn root_id(&self) -> ElemId {
        self.root
    }

    pub fn elem(&self, id: ElemId) -> &Element {
        self.elements[id as usize].as_ref().expect("vacant element slot")
    }

    pub fn elem_mut(&mut self, id: ElemId) -> &mut Element {
        self.elements[id as usize].as_mut().expect("vacant element slot")
    }

    pub fn find_by_created_at(&self, created_at: &TimeTicket) -> Option<ElemId> {
        self.by_created_at.get(created_at).copied()
    }

    pub fn doc_size(&self) -> &DocSize {
        &self.doc_size
    }

    pub fn acc(&mut self, delta: SizeDelta) {
        self.doc_size.apply(delta);
    }

    /// Tombstoned elements plus pending sub-element pairs. What the next
    /// full GC pass would visit.
    pub fn garbage_len(&self) -> usize {
        self.removed.len() + self.gc_pairs.len()
    }

    /// Put an element under a parent and index it by creation ticket.
    /// Re-registering the same ticket is a no-op returning the existing
    /// slot, which is what makes re-applied changes harmless.
    pub fn register_element(&mut self, mut elem: Element, parent: ElemId) -> ElemId {
        if let Some(&id) = self.by_created_at.get(&elem.created_at) {
            return id;
        }
        elem.parent = Some(parent);
        let created_at = elem.created_at;
        let size = elem.own_data_size();
        let id = self.alloc(elem);
        self.by_created_at.insert(created_at, id);
        self.doc_size.live += size;
        id
    }

    /// Note a logically removed element and move its bytes to the gc bucket.
    /// The element must already carry its `removed_at`.
    pub fn register_removed(&mut self, id: ElemId) {
        let elem = self.elem(id);
        debug_assert!(elem.is_removed());
        let created_at = elem.created_at;
        if self.removed.insert(created_at) {
            let size = self.elem(id).own_data_size();
            // The live bucket never saw the removal ticket's meta.
            self.doc_size.live -= DataSize { data: size.data, meta: size.meta - TICKET_SIZE };
            self.doc_size.gc += size;
        }
    }

    pub fn register_gc_pair(&mut self, child: GcChild, removed_at: TimeTicket) {
        self.gc_pairs.insert(child, removed_at);
    }

    /// Build a payload into real elements under `parent`. Tickets come baked
    /// into the payload; an already-materialized subtree is returned as-is.
    pub fn materialize(
        &mut self,
        payload: &ElementPayload,
        created_at: TimeTicket,
        parent: ElemId,
    ) -> ElemId {
        if let Some(&id) = self.by_created_at.get(&created_at) {
            return id;
        }
        match payload {
            ElementPayload::Primitive(p) => {
                self.register_element(Element::new(created_at, Content::Primitive(p.clone())), parent)
            }
            ElementPayload::Counter(v) => self.register_element(
                Element::new(created_at, Content::Counter(CrdtCounter::new(*v))),
                parent,
            ),
            ElementPayload::Text => self.register_element(
                Element::new(created_at, Content::Text(CrdtText::new())),
                parent,
            ),
            ElementPayload::Object(entries) => {
                let id = self.register_element(
                    Element::new(created_at, Content::Object(CrdtObject::new())),
                    parent,
                );
                for entry in entries {
                    let child = self.materialize(&entry.value, entry.created_at, id);
                    self.elem_mut(id)
                        .as_object_mut()
                        .expect("object payload")
                        .set_entry(&entry.key, child);
                }
                id
            }
            ElementPayload::Array(items) => {
                let id = self.register_element(
                    Element::new(created_at, Content::Array(CrdtArray::new())),
                    parent,
                );
                for (pos, item) in items.iter().enumerate() {
                    let child = self.materialize(&item.value, item.created_at, id);
                    self.elem_mut(id)
                        .as_array_mut()
                        .expect("array payload")
                        .insert_node(pos, child);
                }
                id
            }
        }
    }

    /// Snapshot an element subtree back into a payload (structure and leaf
    /// values only - fresh tickets are issued when it materializes again).
    pub fn payload_of(&self, id: ElemId) -> ElementPayload {
        let elem = self.elem(id);
        match &elem.content {
            Content::Primitive(p) => ElementPayload::Primitive(p.clone()),
            Content::Counter(c) => ElementPayload::Counter(c.value()),
            Content::Text(_) => ElementPayload::Text,
            Content::Object(o) => {
                let mut entries: Vec<_> = o
                    .iter()
                    .filter(|(_, child)| !self.elem(*child).is_removed())
                    .map(|(key, child)| crate::crdt::PayloadEntry {
                        key: key.into(),
                        created_at: self.elem(child).created_at,
                        value: self.payload_of(child),
                    })
                    .collect();
                entries.sort_by(|a, b| a.key.cmp(&b.key));
                ElementPayload::Object(entries)
            }
            Content::Array(a) => ElementPayload::Array(
                a.iter()
                    .filter(|child| !self.elem(*child).is_removed())
                    .map(|child| crate::crdt::PayloadItem {
                        created_at: self.elem(child).created_at,
                        value: self.payload_of(child),
                    })
                    .collect(),
            ),
        }
    }

    // ---- structural mutations -------------------------------------------

    /// `obj[key] = value` with last-writer-wins on the key. Returns the
    /// child that got tombstoned by this write, if any.
    pub fn object_set(
        &mut self,
        obj: ElemId,
        key: &str,
        value: ElemId,
        executed_at: &TimeTicket,
    ) -> Option<ElemId> {
        let prev = self.elem(obj).as_object().expect("object target").get(key);

        let mut removed_child = None;
        if let Some(prev_id) = prev {
            if prev_id != value {
                let prev_elem = self.elem_mut(prev_id);
                if !prev_elem.is_removed() && prev_elem.remove(executed_at) {
                    removed_child = Some(prev_id);
                }
            }
        }
        let replace = match prev {
            None => true,
            Some(prev_id) => {
                prev_id == value || executed_at.after(&self.elem(prev_id).positioned_at())
            }
        };
        if replace {
            self.elem_mut(obj)
                .as_object_mut()
                .expect("object target")
                .set_entry(key, value);
        } else {
            // The incoming write lost the key. Park it for collection right
            // away so it doesn't dangle in the registry.
            let winner_at = self.elem(prev.expect("loser implies incumbent")).positioned_at();
            if self.elem_mut(value).remove(&winner_at) {
                self.register_removed(value);
            }
        }
        if let Some(id) = removed_child {
            self.register_removed(id);
        }
        removed_child
    }

    /// Tombstone `target` (a child of any container). The container keeps
    /// the entry until GC.
    pub fn remove_child(&mut self, target: ElemId, executed_at: &TimeTicket) -> bool {
        if self.elem_mut(target).remove(executed_at) {
            self.register_removed(target);
            true
        } else {
            false
        }
    }

    /// Insert `value` after the element created at `prev_created` (the
    /// initial ticket means the array head). Walks past siblings positioned
    /// later than this insertion - the same tie-break as text blocks.
    pub fn array_insert_after(
        &mut self,
        arr: ElemId,
        prev_created: &TimeTicket,
        value: ElemId,
        executed_at: &TimeTicket,
    ) -> Result<(), DocError> {
        let array = self.elem(arr).as_array().expect("array target");
        let mut pos = if *prev_created == TimeTicket::INITIAL {
            0
        } else {
            let prev_id = self
                .find_by_created_at(prev_created)
                .ok_or_else(|| DocError::unknown_element(&format!("{prev_created:?}")))?;
            array
                .position_of(prev_id)
                .ok_or_else(|| DocError::unknown_element(&format!("{prev_created:?}")))?
                + 1
        };
        while pos < array.node_count() {
            let sibling = array.get_node(pos).unwrap();
            if self.elem(sibling).positioned_at().after(executed_at) {
                pos += 1;
            } else {
                break;
            }
        }
        self.elem_mut(arr)
            .as_array_mut()
            .expect("array target")
            .insert_node(pos, value);
        Ok(())
    }

    /// Visible (live) index of a child within an array.
    pub fn array_live_index_of(&self, arr: ElemId, target: ElemId) -> Option<usize> {
        let array = self.elem(arr).as_array()?;
        let mut index = 0;
        for child in array.iter() {
            if child == target {
                return Some(index);
            }
            if !self.elem(child).is_removed() {
                index += 1;
            }
        }
        None
    }

    /// Reposition an existing element after `prev_created`. Loses to any
    /// later move of the same element.
    pub fn array_move_after(
        &mut self,
        arr: ElemId,
        prev_created: &TimeTicket,
        target_created: &TimeTicket,
        executed_at: &TimeTicket,
    ) -> Result<bool, DocError> {
        let target = self
            .find_by_created_at(target_created)
            .ok_or_else(|| DocError::unknown_element(&format!("{target_created:?}")))?;
        if !executed_at.after(&self.elem(target).positioned_at()) {
            return Ok(false);
        }
        self.elem_mut(arr)
            .as_array_mut()
            .expect("array target")
            .remove_node(target);
        self.array_insert_after(arr, prev_created, target, executed_at)?;
        self.elem_mut(target).moved_at = Some(*executed_at);
        Ok(true)
    }

    // ---- garbage collection ---------------------------------------------

    /// Purge everything whose removal every peer has observed, per
    /// `min_synced`. Returns how many elements and sub-element pairs went.
    pub fn garbage_collect(&mut self, min_synced: &VersionVector) -> usize {
        let mut count = 0;

        let candidates: Vec<TimeTicket> = self.removed.iter().copied().collect();
        for created_at in candidates {
            if !self.removed.contains(&created_at) {
                continue; // purged as a descendant of an earlier candidate
            }
            let Some(&id) = self.by_created_at.get(&created_at) else {
                self.removed.remove(&created_at);
                continue;
            };
            let covered = self
                .elem(id)
                .removed_at
                .as_ref()
                .map_or(false, |r| min_synced.covers(r));
            if !covered {
                continue;
            }
            self.detach_from_parent(id);
            count += self.purge_subtree(id);
        }

        let ready: Vec<GcChild> = self
            .gc_pairs
            .iter()
            .filter(|(_, removed_at)| min_synced.covers(removed_at))
            .map(|(child, _)| child.clone())
            .collect();
        for child in ready {
            self.gc_pairs.remove(&child);
            count += self.purge_gc_child(&child);
        }

        if count > 0 {
            debug!("garbage collected {count} nodes, doc size now {}", self.doc_size);
        }
        count
    }

    fn detach_from_parent(&mut self, id: ElemId) {
        let Some(parent) = self.elem(id).parent else { return };
        if self.elements[parent as usize].is_none() {
            return;
        }
        match &mut self.elem_mut(parent).content {
            Content::Object(o) => {
                o.purge_entry(id);
            }
            Content::Array(a) => {
                a.remove_node(id);
            }
            _ => {}
        }
    }

    /// Drop an element and everything under it, settling the size ledger as
    /// each node goes.
    fn purge_subtree(&mut self, id: ElemId) -> usize {
        let mut stack = vec![id];
        let mut subtree = Vec::new();
        while let Some(cur) = stack.pop() {
            subtree.push(cur);
            match &self.elem(cur).content {
                Content::Object(o) => stack.extend(o.iter().map(|(_, child)| child)),
                Content::Array(a) => stack.extend(a.iter()),
                _ => {}
            }
        }

        let mut count = 0;
        for id in subtree {
            count += self.purge_text_pairs(id);

            let elem = self.elements[id as usize].take().expect("vacant element slot");
            let size = elem.own_data_size();
            self.by_created_at.remove(&elem.created_at);
            self.free.push(id);
            if self.removed.remove(&elem.created_at) {
                self.doc_size.gc -= size;
            } else {
                self.doc_size.live -= size;
            }
            count += 1;
        }
        count
    }

    /// Settle the pending garbage pairs of a text element that is being
    /// purged wholesale, so the gc bucket drains exactly what it was fed.
    fn purge_text_pairs(&mut self, id: ElemId) -> usize {
        if !matches!(self.elem(id).content, Content::Text(_)) {
            return 0;
        }
        let owner = self.elem(id).created_at;
        let pending: Vec<GcChild> = self
            .gc_pairs
            .keys()
            .filter(|child| *child.owner() == owner)
            .cloned()
            .collect();
        let mut count = 0;
        for child in pending {
            self.gc_pairs.remove(&child);
            count += self.purge_gc_child(&child);
        }
        count
    }

    fn purge_gc_child(&mut self, child: &GcChild) -> usize {
        let Some(&id) = self.by_created_at.get(child.owner()) else {
            // The owning element is already gone; nothing left to free.
            return 0;
        };
        let Some(text) = self.elem_mut(id).as_text_mut() else { return 0 };
        let purged = match child {
            GcChild::TextNode { node, .. } => text.purge_node(node),
            GcChild::TextAttr { node, key, updated_at, .. } => {
                text.purge_attr(node, key, updated_at)
            }
        };
        match purged {
            Ok(size) => {
                self.doc_size.gc -= size;
                1
            }
            Err(_) => 0,
        }
    }

    // ---- paths and JSON --------------------------------------------------

    /// `$.a.b.0.c` style path of an element, built by walking parent edges.
    pub fn path_of(&self, id: ElemId) -> Result<String, DocError> {
        let mut segments: Vec<String> = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.elem(cur).parent {
            let seg = match &self.elem(parent).content {
                Content::Object(o) => o
                    .key_of(cur)
                    .map(str::to_owned)
                    .ok_or_else(|| DocError::unknown_element("detached object child"))?,
                Content::Array(a) => {
                    let mut index = 0;
                    let mut found = false;
                    for child in a.iter() {
                        if child == cur {
                            found = true;
                            break;
                        }
                        if !self.elem(child).is_removed() {
                            index += 1;
                        }
                    }
                    if !found {
                        return Err(DocError::unknown_element("detached array child"));
                    }
                    index.to_string()
                }
                _ => return Err(DocError::InvalidArgument("parent is not a container".into())),
            };
            segments.push(seg);
            cur = parent;
        }
        segments.push("$".into());
        segments.reverse();
        Ok(segments.join("."))
    }

    /// Walk a `$.a.b.0.c` path down from the root.
    pub fn resolve_path(&self, path: &str) -> Result<ElemId, DocError> {
        let mut parts = path.split('.');
        if parts.next() != Some("$") {
            return Err(DocError::InvalidArgument(format!("path must start with $: {path:?}")));
        }
        let mut cur = self.root;
        for part in parts {
            if part.is_empty() {
                return Err(DocError::InvalidArgument(format!("empty path segment in {path:?}")));
            }
            cur = match &self.elem(cur).content {
                Content::Object(o) => o
                    .get(part)
                    .filter(|&id| !self.elem(id).is_removed())
                    .ok_or_else(|| DocError::unknown_element(part))?,
                Content::Array(a) => {
                    let index: usize = part
                        .parse()
                        .map_err(|_| DocError::InvalidArgument(format!("bad array index {part:?}")))?;
                    a.iter()
                        .filter(|&id| !self.elem(id).is_removed())
                        .nth(index)
                        .ok_or_else(|| DocError::unknown_element(part))?
                }
                _ => return Err(DocError::InvalidArgument(format!("{part:?} under a leaf"))),
            };
        }
        Ok(cur)
    }

    pub fn json_of(&self, id: ElemId) -> Json {
        let elem = self.elem(id);
        match &elem.content {
            Content::Primitive(p) => p.to_json(),
            Content::Counter(c) => c.to_json(),
            Content::Text(t) => Json::from(t.to_string()),
            Content::Object(o) => {
                let mut map = serde_json::Map::new();
                for (key, child) in o.iter() {
                    if !self.elem(child).is_removed() {
                        map.insert(key.to_owned(), self.json_of(child));
                    }
                }
                Json::Object(map)
            }
            Content::Array(a) => Json::Array(
                a.iter()
                    .filter(|&child| !self.elem(child).is_removed())
                    .map(|child| self.json_of(child))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Json {
        self.json_of(self.root)
    }

    /// Canonical JSON string: object keys sorted, text rendered as chunks
    /// with their attributes. Replicas that converged print byte-identical
    /// strings.
    pub fn sorted_json_of(&self, id: ElemId) -> String {
        let elem = self.elem(id);
        match &elem.content {
            Content::Primitive(p) => p.to_json().to_string(),
            Content::Counter(c) => c.to_json().to_string(),
            Content::Text(t) => t.to_sorted_json(),
            Content::Object(o) => {
                let mut entries: Vec<(&str, ElemId)> = o
                    .iter()
                    .filter(|(_, child)| !self.elem(*child).is_removed())
                    .collect();
                entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
                let mut out = String::from("{");
                for (i, (key, child)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!("{}:{}", Json::from(*key), self.sorted_json_of(*child)));
                }
                out.push('}');
                out
            }
            Content::Array(a) => {
                let mut out = String::from("[");
                let mut first = true;
                for child in a.iter().filter(|&c| !self.elem(c).is_removed()) {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    out.push_str(&self.sorted_json_of(child));
                }
                out.push(']');
                out
            }
        }
    }

    pub fn to_sorted_json(&self) -> String {
        self.sorted_json_of(self.root)
    }

    /// Registry consistency checker for tests and fuzzers.
    #[allow(unused)]
    pub(crate) fn dbg_check(&self) {
        for (created_at, &id) in &self.by_created_at {
            let elem = self.elements[id as usize]
                .as_ref()
                .unwrap_or_else(|| panic!("registry points at vacant slot {id}"));
            assert_eq!(elem.created_at, *created_at);
        }
        for created_at in &self.removed {
            assert!(
                self.by_created_at.contains_key(created_at),
                "removed set references unregistered element"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crdt::primitive::Primitive;
    use crate::time::ActorId;

    fn ticket(lamport: u64, delimiter: u32) -> TimeTicket {
        TimeTicket::new(lamport, delimiter, ActorId::INITIAL)
    }

    #[test]
    fn register_and_lookup() {
        let mut root = CrdtRoot::new();
        let t = ticket(1, 1);
        let id = root.register_element(
            Element::new(t, Content::Primitive(Primitive::Integer(1))),
            root.root_id(),
        );
        assert_eq!(root.find_by_created_at(&t), Some(id));
        // Same ticket, same slot.
        let again = root.register_element(
            Element::new(t, Content::Primitive(Primitive::Integer(99))),
            root.root_id(),
        );
        assert_eq!(again, id);
        root.dbg_check();
    }

    #[test]
    fn object_set_lww() {
        let mut root = CrdtRoot::new();
        let obj = root.root_id();

        let a = root.register_element(
            Element::new(ticket(1, 1), Content::Primitive(Primitive::Integer(1))),
            obj,
        );
        root.object_set(obj, "k", a, &ticket(1, 2));
        assert_eq!(root.to_sorted_json(), "{\"k\":1}");

        // A later write replaces and tombstones the old child.
        let b = root.register_element(
            Element::new(ticket(2, 1), Content::Primitive(Primitive::Integer(2))),
            obj,
        );
        let displaced = root.object_set(obj, "k", b, &ticket(2, 2));
        assert_eq!(displaced, Some(a));
        assert_eq!(root.to_sorted_json(), "{\"k\":2}");
        assert_eq!(root.garbage_len(), 1);

        // An earlier (concurrent, already-lost) write does not take the key.
        let c = root.register_element(
            Element::new(ticket(1, 5), Content::Primitive(Primitive::Integer(3))),
            obj,
        );
        root.object_set(obj, "k", c, &ticket(1, 6));
        assert_eq!(root.to_sorted_json(), "{\"k\":2}");
    }

    #[test]
    fn gc_respects_version_vector() {
        let actor = ActorId::from_hex("00000000000000000000000000000001").unwrap();
        let mut root = CrdtRoot::new();
        let obj = root.root_id();
        let a = root.register_element(
            Element::new(
                TimeTicket::new(1, 1, actor),
                Content::Primitive(Primitive::Integer(1)),
            ),
            obj,
        );
        root.object_set(obj, "k", a, &TimeTicket::new(1, 2, actor));
        assert!(root.remove_child(a, &TimeTicket::new(2, 1, actor)));
        assert_eq!(root.garbage_len(), 1);

        // Nobody has seen lamport 2 yet.
        let vv: VersionVector = [(actor, 1)].into_iter().collect();
        assert_eq!(root.garbage_collect(&vv), 0);
        assert_eq!(root.garbage_len(), 1);

        let vv: VersionVector = [(actor, 2)].into_iter().collect();
        assert_eq!(root.garbage_collect(&vv), 1);
        assert_eq!(root.garbage_len(), 0);
        assert!(root.find_by_created_at(&TimeTicket::new(1, 1, actor)).is_none());
        root.dbg_check();
    }

    #[test]
    fn paths_resolve_both_ways() {
        let mut root = CrdtRoot::new();
        let obj = root.root_id();
        let arr = root.register_element(
            Element::new(ticket(1, 1), Content::Array(CrdtArray::new())),
            obj,
        );
        root.object_set(obj, "list", arr, &ticket(1, 2));
        let item = root.register_element(
            Element::new(ticket(2, 1), Content::Primitive(Primitive::Str("x".into()))),
            arr,
        );
        root.array_insert_after(arr, &TimeTicket::INITIAL, item, &ticket(2, 1)).unwrap();

        assert_eq!(root.path_of(item).unwrap(), "$.list.0");
        assert_eq!(root.resolve_path("$.list.0").unwrap(), item);
        assert!(root.resolve_path("$.list.1").is_err());
        assert!(root.resolve_path("nope").is_err());
    }
}
