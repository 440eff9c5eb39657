//! cord: the client-side core of a collaborative document engine.
//!
//! Documents are hierarchical CRDTs - objects, arrays, counters and rich
//! text - that many clients edit concurrently, offline or online, and that
//! converge deterministically once changes are exchanged through a server.
//!
//! The layering, leaves first:
//!
//! - [`time`]: actor ids, lamport tickets, version vectors. Total order and
//!   causality live here.
//! - [`splay`], [`llrb`], [`rht`]: the supporting structures - index-by-
//!   weight lookup, id-keyed floor lookup, last-writer-wins maps.
//! - [`crdt`]: the element tree, the block-based split list behind rich
//!   text, and the root registry with its version-vector-guarded garbage
//!   collector.
//! - [`operation`], [`change`]: typed operations and the batches that carry
//!   them, with ticket issuance and reversal capture.
//! - [`document`]: the loop - speculative clones, remote packs, snapshots,
//!   checkpoints, event fan-out, undo/redo.
//!
//! The binary wire codec and the transport live outside this crate; [`pack`]
//! holds the decoded shapes they exchange with the core.

pub mod change;
pub mod crdt;
pub mod document;
pub mod error;
pub mod llrb;
pub mod operation;
pub mod pack;
pub mod presence;
pub mod rht;
pub mod schema;
pub mod splay;
pub mod time;

pub use change::{Change, ChangeContext, ChangeId, ChangeSource, Checkpoint};
pub use document::{
    DocEvent, DocStatus, Document, DocumentOptions, EventFilter, Subscription, Transaction,
};
pub use error::DocError;
pub use operation::{OpInfo, OpInfoKind, Operation};
pub use pack::{ChangePack, DocKey, DocSnapshot, WatchDocEventType, WatchDocumentResponse};
pub use presence::{PresenceChange, PresenceData};
pub use schema::{Rule, RuleKind};
pub use time::{ActorId, TimeTicket, VersionVector};
