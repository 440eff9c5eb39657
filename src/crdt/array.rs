//! Array storage: children in document order, tombstones included.
//!
//! Ordering decisions (the RGA insertion walk, moves) need the children's
//! tickets, so they live at the root level. This keeps the flat order and
//! answers index queries that skip removed children.

use crate::crdt::ElemId;

#[derive(Debug, Clone, Default)]
pub struct CrdtArray {
    nodes: Vec<ElemId>,
}

impl CrdtArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// All children in document order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = ElemId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node(&self, pos: usize) -> Option<ElemId> {
        self.nodes.get(pos).copied()
    }

    /// Physical position of `elem` in the node list.
    pub fn position_of(&self, elem: ElemId) -> Option<usize> {
        self.nodes.iter().position(|&id| id == elem)
    }

    pub fn insert_node(&mut self, pos: usize, elem: ElemId) {
        self.nodes.insert(pos, elem);
    }

    pub fn remove_node(&mut self, elem: ElemId) -> bool {
        if let Some(pos) = self.position_of(elem) {
            self.nodes.remove(pos);
            true
        } else {
            false
        }
    }
}
