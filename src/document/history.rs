//! Undo/redo stacks.
//!
//! Each entry is the reverse trail one change reported. Undo replays an
//! entry through a fresh change context (new tickets, normal propagation)
//! and pushes whatever that replay reports onto the opposite stack.

use crate::operation::ReverseOp;

/// Bounded like an editor's history, not a database log.
const MAX_DEPTH: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub ops: Vec<ReverseOp>,
}

#[derive(Debug, Default)]
pub struct UndoRedoHistory {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

impl UndoRedoHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_undo(&mut self, entry: HistoryEntry) {
        if self.undo.len() == MAX_DEPTH {
            self.undo.remove(0);
        }
        self.undo.push(entry);
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        if self.redo.len() == MAX_DEPTH {
            self.redo.remove(0);
        }
        self.redo.push(entry);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// A fresh local edit makes redo meaningless.
    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
