//! Logical time: actor identity, lamport tickets and version vectors.
//!
//! Everything above this module agrees on ordering by comparing tickets, so
//! the comparison rules here are load bearing for convergence. Don't change
//! them without rerunning the convergence fuzzer.

pub mod actor;
pub mod ticket;
pub mod version_vector;

pub use actor::{ActorId, ACTOR_ID_SIZE};
pub use ticket::{Delimiter, Lamport, TimeTicket, TICKET_SIZE};
pub use version_vector::VersionVector;
