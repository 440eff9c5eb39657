//! Document events and the subscribe surface.
//!
//! Everything the document does is narrated as batches of [`DocEvent`]s on
//! one broadcast stream; per-topic subscribers are filtered adapters over
//! it. A subscriber owns a queue the document pushes filtered batches into,
//! and the document holds only weak handles - dropping a [`Subscription`]
//! unsubscribes.
//!
//! Batches are atomic: everything one application step produced is
//! delivered together, after the state mutation completed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use smartstring::alias::String as SmartString;

use crate::document::DocStatus;
use crate::error::DocError;
use crate::operation::OpInfo;
use crate::presence::PresenceData;
use crate::time::ActorId;

#[derive(Debug, Clone, PartialEq)]
pub enum DocEvent {
    /// The root was replaced wholesale by a server snapshot.
    Snapshot { server_seq: u64 },
    LocalChange {
        actor: ActorId,
        client_seq: u32,
        message: Option<SmartString>,
        operations: Vec<OpInfo>,
    },
    RemoteChange {
        actor: ActorId,
        client_seq: u32,
        message: Option<SmartString>,
        operations: Vec<OpInfo>,
    },
    StatusChanged { status: DocStatus },
    /// First presence seen from an online client.
    Watched { actor: ActorId, presence: PresenceData },
    Unwatched { actor: ActorId },
    PresenceChanged { actor: ActorId, presence: PresenceData },
    /// A broadcast from another client, via the watch stream.
    Broadcast { actor: ActorId, topic: SmartString, payload: Vec<u8> },
    /// A broadcast this client wants pushed upstream.
    LocalBroadcast { topic: SmartString, payload: Vec<u8> },
    AuthError { reason: String },
}

/// A parsed topic selector.
#[derive(Debug, Clone, PartialEq)]
pub enum EventFilter {
    Default,
    Presence,
    MyPresence,
    Others,
    Connection,
    Status,
    Sync,
    Broadcast,
    LocalBroadcast,
    AuthError,
    All,
    /// `$.a.b.0.c` - change events touching paths under this prefix.
    Path(String),
}

impl EventFilter {
    pub fn parse(selector: &str) -> Result<EventFilter, DocError> {
        Ok(match selector {
            "default" => EventFilter::Default,
            "presence" => EventFilter::Presence,
            "my-presence" => EventFilter::MyPresence,
            "others" => EventFilter::Others,
            "connection" => EventFilter::Connection,
            "status" => EventFilter::Status,
            "sync" => EventFilter::Sync,
            "broadcast" => EventFilter::Broadcast,
            "local-broadcast" => EventFilter::LocalBroadcast,
            "auth-error" => EventFilter::AuthError,
            "all" => EventFilter::All,
            path if path.starts_with('$') => EventFilter::Path(path.to_owned()),
            _ => {
                return Err(DocError::InvalidArgument(format!(
                    "unknown subscribe selector {selector:?}"
                )))
            }
        })
    }

    /// Does `path` sit at or under the selector prefix? `$.a` covers
    /// `$.a.b` but not `$.ab`.
    fn path_matches(prefix: &str, path: &str) -> bool {
        path == prefix
            || (path.len() > prefix.len()
                && path.starts_with(prefix)
                && path.as_bytes()[prefix.len()] == b'.')
    }

    /// Apply the filter to one event. Returns the (possibly trimmed) event
    /// a subscriber should see, or None.
    pub fn apply(&self, event: &DocEvent, me: &ActorId) -> Option<DocEvent> {
        let pass = match self {
            EventFilter::All => true,
            EventFilter::Default => matches!(
                event,
                DocEvent::Snapshot { .. }
                    | DocEvent::LocalChange { .. }
                    | DocEvent::RemoteChange { .. }
                    | DocEvent::StatusChanged { .. }
            ),
            EventFilter::Presence => matches!(
                event,
                DocEvent::Watched { .. }
                    | DocEvent::Unwatched { .. }
                    | DocEvent::PresenceChanged { .. }
            ),
            EventFilter::MyPresence => {
                matches!(event, DocEvent::PresenceChanged { actor, .. } if actor == me)
            }
            EventFilter::Others => matches!(
                event,
                DocEvent::Watched { actor, .. }
                    | DocEvent::Unwatched { actor }
                    | DocEvent::PresenceChanged { actor, .. }
                if actor != me
            ),
            // Connection and sync state belong to the transport; it injects
            // nothing through this stream today.
            EventFilter::Connection | EventFilter::Sync => false,
            EventFilter::Status => matches!(event, DocEvent::StatusChanged { .. }),
            EventFilter::Broadcast => matches!(event, DocEvent::Broadcast { .. }),
            EventFilter::LocalBroadcast => matches!(event, DocEvent::LocalBroadcast { .. }),
            EventFilter::AuthError => matches!(event, DocEvent::AuthError { .. }),
            EventFilter::Path(prefix) => {
                // Trim the change to the ops under the prefix.
                let trim = |ops: &[OpInfo]| -> Vec<OpInfo> {
                    ops.iter()
                        .filter(|op| Self::path_matches(prefix, &op.path))
                        .cloned()
                        .collect()
                };
                return match event {
                    DocEvent::LocalChange { actor, client_seq, message, operations } => {
                        let operations = trim(operations);
                        (!operations.is_empty()).then(|| DocEvent::LocalChange {
                            actor: *actor,
                            client_seq: *client_seq,
                            message: message.clone(),
                            operations,
                        })
                    }
                    DocEvent::RemoteChange { actor, client_seq, message, operations } => {
                        let operations = trim(operations);
                        (!operations.is_empty()).then(|| DocEvent::RemoteChange {
                            actor: *actor,
                            client_seq: *client_seq,
                            message: message.clone(),
                            operations,
                        })
                    }
                    _ => None,
                };
            }
        };
        pass.then(|| event.clone())
    }
}

pub(crate) type EventQueue = Rc<RefCell<VecDeque<Vec<DocEvent>>>>;

/// A handle to a filtered event queue. Poll it whenever convenient; batches
/// arrive in publish order. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    queue: EventQueue,
}

impl Subscription {
    pub(crate) fn new(queue: EventQueue) -> Self {
        Subscription { queue }
    }

    /// The next pending batch, if any.
    pub fn poll(&self) -> Option<Vec<DocEvent>> {
        self.queue.borrow_mut().pop_front()
    }

    /// Drain everything pending into one flat list.
    pub fn drain(&self) -> Vec<DocEvent> {
        self.queue.borrow_mut().drain(..).flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// The document side of the fan-out.
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    subscribers: Vec<(EventFilter, Weak<RefCell<VecDeque<Vec<DocEvent>>>>)>,
}

impl EventHub {
    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        let queue: EventQueue = Rc::new(RefCell::new(VecDeque::new()));
        self.subscribers.push((filter, Rc::downgrade(&queue)));
        Subscription::new(queue)
    }

    /// Deliver one atomic batch to every live subscriber whose filter keeps
    /// any of it.
    pub fn publish(&mut self, batch: &[DocEvent], me: &ActorId) {
        if batch.is_empty() {
            return;
        }
        self.subscribers.retain(|(filter, weak)| {
            let Some(queue) = weak.upgrade() else { return false };
            let filtered: Vec<DocEvent> =
                batch.iter().filter_map(|ev| filter.apply(ev, me)).collect();
            if !filtered.is_empty() {
                queue.borrow_mut().push_back(filtered);
            }
            true
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_prefix_matching() {
        assert!(EventFilter::path_matches("$.a", "$.a"));
        assert!(EventFilter::path_matches("$.a", "$.a.b.0"));
        assert!(!EventFilter::path_matches("$.a", "$.ab"));
        assert!(!EventFilter::path_matches("$.a.b", "$.a"));
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(EventFilter::parse("others").unwrap(), EventFilter::Others);
        assert_eq!(
            EventFilter::parse("$.todos.0").unwrap(),
            EventFilter::Path("$.todos.0".into())
        );
        assert!(EventFilter::parse("everything").is_err());
    }
}
