//! Change events
//!
//! Every successful mutation of a database, and every peer link coming up or
//! going down, is published as a [`ChangeEvent`] on the database's
//! [`EventBroadcaster`]. Local subscribers and the mesh protocol consume the
//! same feed.

pub mod broadcaster;

pub use broadcaster::{EventBroadcaster, RecvError, Subscription};

use crate::core_store::crdt::VectorClock;
use crate::core_store::model::Record;

/// Where a mutation came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// Written through this database's own API
    Local,

    /// Merged from a mesh message
    Remote {
        /// Peer the message arrived from
        via: String,
        /// Peer that authored the mutation, preserved across hops
        origin_id: Option<String>,
    },
}

impl EventSource {
    pub fn remote(via: impl Into<String>, origin_id: Option<String>) -> Self {
        EventSource::Remote { via: via.into(), origin_id }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EventSource::Local)
    }

    /// Whether a change from this source must not be sent back to `peer_id`
    pub fn came_from(&self, peer_id: &str) -> bool {
        match self {
            EventSource::Local => false,
            EventSource::Remote { via, origin_id } => {
                via == peer_id || origin_id.as_deref() == Some(peer_id)
            }
        }
    }
}

/// Events published by a database
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    NodeUpsert {
        record: Record,
        source: EventSource,
    },
    NodeDelete {
        id: String,
        /// The tombstone now stored for `id`
        tombstone: Record,
        source: EventSource,
    },
}

impl ChangeEvent {
    /// Record id touched by this event, if any
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::NodeUpsert { record, .. } => Some(&record.id),
            ChangeEvent::NodeDelete { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&EventSource> {
        match self {
            ChangeEvent::NodeUpsert { source, .. } | ChangeEvent::NodeDelete { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Clock of the version carried by a mutation event
    pub fn vector_clock(&self) -> Option<&VectorClock> {
        match self {
            ChangeEvent::NodeUpsert { record, .. } => Some(&record.vector_clock),
            ChangeEvent::NodeDelete { tombstone, .. } => Some(&tombstone.vector_clock),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_came_from() {
        assert!(!EventSource::Local.came_from("p1"));

        let source = EventSource::remote("p2", Some("p1".to_string()));
        assert!(source.came_from("p1"));
        assert!(source.came_from("p2"));
        assert!(!source.came_from("p3"));
    }

    #[test]
    fn test_record_id() {
        let tombstone = Record::tombstone("x", 1, VectorClock::new());
        let event =
            ChangeEvent::NodeDelete { id: "x".to_string(), tombstone, source: EventSource::Local };
        assert_eq!(event.record_id(), Some("x"));
        assert!(event.source().unwrap().is_local());

        let event = ChangeEvent::PeerConnected { peer_id: "p".to_string() };
        assert_eq!(event.record_id(), None);
        assert!(event.vector_clock().is_none());
    }
}
