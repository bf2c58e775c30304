//! Event model: a closed set of event kinds with typed content.
//!
//! Routing decisions (which event type an event has, whether it grants
//! visibility to a user outside the room) are made by matching on
//! [`EventContent`] rather than by inspecting type strings at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::{EventId, Id, RoomId, UserId};
use crate::EventInfo;

pub const EVENT_TYPE_MESSAGE: &str = "m.room.message";
pub const EVENT_TYPE_CREATE: &str = "m.room.create";
pub const EVENT_TYPE_MEMBER: &str = "m.room.member";
pub const EVENT_TYPE_NAME: &str = "m.room.name";
pub const EVENT_TYPE_TOPIC: &str = "m.room.topic";
pub const EVENT_TYPE_TYPING: &str = "m.typing";
pub const EVENT_TYPE_PRESENCE: &str = "m.presence";

/// Membership value carried by an `m.room.member` state event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Invite,
    Join,
    Knock,
    Leave,
    Ban,
}

impl Membership {
    /// Whether a state change to this membership must also be delivered to
    /// the affected user, who is not (or no longer) a member of the room.
    pub fn notifies_target(self) -> bool {
        matches!(self, Self::Invite | Self::Knock | Self::Ban)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::Join => "join",
            Self::Knock => "knock",
            Self::Leave => "leave",
            Self::Ban => "ban",
        }
    }
}

/// User presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    #[default]
    Offline,
    Unavailable,
}

/// Content of a room state event, tagged by its state event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum StateContent {
    #[serde(rename = "m.room.create")]
    Create { creator: UserId },

    #[serde(rename = "m.room.member")]
    Member {
        membership: Membership,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        displayname: Option<String>,
    },

    #[serde(rename = "m.room.name")]
    Name { name: String },

    #[serde(rename = "m.room.topic")]
    Topic { topic: String },
}

impl StateContent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Create { .. } => EVENT_TYPE_CREATE,
            Self::Member { .. } => EVENT_TYPE_MEMBER,
            Self::Name { .. } => EVENT_TYPE_NAME,
            Self::Topic { .. } => EVENT_TYPE_TOPIC,
        }
    }
}

/// Latest presence and profile information of one user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserPresence {
    pub presence: PresenceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Typed event content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventContent {
    /// A room timeline message.
    Message { msgtype: String, body: String },

    /// A room state change. `prev_content` is the state this event replaced.
    State {
        state_key: String,
        content: StateContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_content: Option<StateContent>,
    },

    /// The set of users currently typing in a room.
    Typing { user_ids: Vec<UserId> },

    /// Presence of the event's sender.
    Presence(UserPresence),
}

/// A full event as stored by the message log and delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub sender: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub origin_server_ts: DateTime<Utc>,
    pub content: EventContent,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(
        event_id: EventId,
        room_id: Option<RoomId>,
        sender: UserId,
        content: EventContent,
    ) -> Self {
        Self {
            event_id,
            room_id,
            sender,
            origin_server_ts: Utc::now(),
            content,
        }
    }

    pub fn event_type(&self) -> &str {
        match &self.content {
            EventContent::Message { .. } => EVENT_TYPE_MESSAGE,
            EventContent::State { content, .. } => content.event_type(),
            EventContent::Typing { .. } => EVENT_TYPE_TYPING,
            EventContent::Presence(_) => EVENT_TYPE_PRESENCE,
        }
    }

    pub fn state_key(&self) -> Option<&str> {
        match &self.content {
            EventContent::State { state_key, .. } => Some(state_key),
            _ => None,
        }
    }

    /// Membership value if this is an `m.room.member` state event.
    pub fn membership(&self) -> Option<Membership> {
        match &self.content {
            EventContent::State {
                content: StateContent::Member { membership, .. },
                ..
            } => Some(*membership),
            _ => None,
        }
    }

    /// The user who must see this event despite not being a room member.
    ///
    /// Only membership events moving a user to invite, knock or ban have
    /// one: the user named by the state key. A state key that is not a valid
    /// user id is logged and yields `None`.
    pub fn extra_recipient(&self) -> Option<UserId> {
        let membership = self.membership()?;
        if !membership.notifies_target() {
            return None;
        }
        let state_key = self.state_key()?;
        match UserId::parse(state_key) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(
                    event_id = %self.event_id,
                    state_key,
                    "membership event state key is not a user id: {}",
                    e
                );
                None
            }
        }
    }

    /// Routing envelope for this event. The context is the room, or the
    /// sender for events that are not scoped to a room.
    pub fn info(&self) -> EventInfo {
        let context_id = match &self.room_id {
            Some(room) => Id::from(room),
            None => Id::from(&self.sender),
        };
        EventInfo::new(
            context_id,
            self.event_id.clone(),
            self.sender.clone(),
            self.event_type(),
        )
    }
}

/// An event paired with the index its log assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEvent {
    pub index: u64,
    pub event: Arc<Event>,
}

impl IndexedEvent {
    pub fn new(index: u64, event: Arc<Event>) -> Self {
        Self { index, event }
    }
}
