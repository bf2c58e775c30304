//! Shared types for the Courier event-distribution core.
//!
//! This crate provides the identifiers, the event model, the routing
//! envelope ([`EventInfo`]), the stream token codec and the collaborator
//! traits used across all Courier crates. It depends on nothing else in the
//! workspace.

mod collab;
mod event;
mod ids;
pub mod token;

pub use collab::{AsyncEventSink, DeliveryError, MembershipError, MembershipStore};
pub use event::{
    Event, EventContent, IndexedEvent, Membership, PresenceState, StateContent, UserPresence,
    EVENT_TYPE_CREATE, EVENT_TYPE_MEMBER, EVENT_TYPE_MESSAGE, EVENT_TYPE_NAME,
    EVENT_TYPE_PRESENCE, EVENT_TYPE_TOPIC, EVENT_TYPE_TYPING,
};
pub use ids::{EventId, Id, IdError, RoomId, UserId};
pub use token::{ShardId, ShardTuple, StreamToken, TokenError};

use serde::{Deserialize, Serialize};

/// Routing envelope of a signal.
///
/// Carries only what the recipient-keyed logs need: the context the event
/// belongs to (a room, or a user for user-scoped signals), the event
/// identity, the sender and the event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventInfo {
    pub context_id: Id,
    pub event_id: EventId,
    pub sender: UserId,
    pub event_type: String,
}

impl EventInfo {
    pub fn new(
        context_id: Id,
        event_id: EventId,
        sender: UserId,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            context_id,
            event_id,
            sender,
            event_type: event_type.into(),
        }
    }
}

/// An [`EventInfo`] paired with the index its log assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEventInfo {
    pub info: EventInfo,
    pub index: u64,
}

impl IndexedEventInfo {
    pub fn new(info: EventInfo, index: u64) -> Self {
        Self { info, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_info_serde_roundtrip() {
        let info = EventInfo::new(
            Id::from(RoomId::new("room1", "test")),
            EventId::new("e1", "test"),
            UserId::new("alice", "test"),
            EVENT_TYPE_MESSAGE,
        );
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"context_id\":\"!room1:test\""));
        let back: EventInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn indexed_event_info_keeps_index() {
        let info = EventInfo::new(
            Id::new("@bob:test"),
            EventId::new("e2", "test"),
            UserId::new("bob", "test"),
            EVENT_TYPE_TYPING,
        );
        let indexed = IndexedEventInfo::new(info.clone(), 7);
        assert_eq!(indexed.index, 7);
        assert_eq!(indexed.info, info);
    }
}
