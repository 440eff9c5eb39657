//! Changes: the unit of replication.
//!
//! A change is a batch of operations sharing one [`ChangeId`], plus an
//! optional message and presence delta. Local changes are built through a
//! [`ChangeContext`]; remote changes arrive in packs and are executed with
//! their author's version vector as the causal gate.

pub mod change_id;
pub mod checkpoint;
pub mod context;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

pub use change_id::ChangeId;
pub use checkpoint::Checkpoint;
pub use context::ChangeContext;

use crate::crdt::root::CrdtRoot;
use crate::error::DocError;
use crate::operation::{OpInfo, Operation, ReverseOp};
use crate::presence::{PresenceChange, PresenceData};
use crate::time::ActorId;

/// Where a change is coming from when it hits a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    Local,
    Remote,
    UndoRedo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub message: Option<SmartString>,
    pub operations: SmallVec<[Operation; 2]>,
    pub presence_change: Option<PresenceChange>,
}

impl Change {
    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn is_presence_only(&self) -> bool {
        self.operations.is_empty()
    }

    /// Run the operations in order against `root` and fold the presence
    /// delta into `presences`.
    ///
    /// Returns the op infos in application order, and the reverse trail in
    /// reverse application order (the order undo must replay them).
    pub fn execute(
        &self,
        root: &mut CrdtRoot,
        presences: &mut HashMap<ActorId, PresenceData>,
        source: ChangeSource,
    ) -> Result<(Vec<OpInfo>, Vec<ReverseOp>), DocError> {
        // Remote changes only touch what their author had seen; local and
        // undo/redo changes act on everything.
        let gating = match source {
            ChangeSource::Remote => Some(&self.id.version_vector),
            ChangeSource::Local | ChangeSource::UndoRedo => None,
        };

        let mut op_infos = Vec::new();
        let mut reverse_lists: SmallVec<[SmallVec<[ReverseOp; 1]>; 2]> = SmallVec::new();
        for op in &self.operations {
            let exec = op.execute(root, gating)?;
            op_infos.extend(exec.op_infos);
            reverse_lists.push(exec.reverse_ops);
        }

        match &self.presence_change {
            Some(PresenceChange::Put { presence }) => {
                presences.insert(self.id.actor, presence.clone());
            }
            Some(PresenceChange::Clear) => {
                presences.remove(&self.id.actor);
            }
            None => {}
        }

        let reverse_ops = reverse_lists.into_iter().rev().flatten().collect();
        Ok((op_infos, reverse_ops))
    }
}
