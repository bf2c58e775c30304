//! Room state and membership for the Courier chat server.
//!
//! [`RoomStore`] keeps the current state of every room, keyed by
//! `(event type, state key)`, and maintains a [`MemberStore`] from the
//! membership events it stores. It implements
//! [`MembershipStore`](courier_types::MembershipStore), which is how the
//! event logs decide who sees what.
//!
//! Lock ordering: the room map is always acquired before a room's state, and
//! a room's state before the member index.

mod members;

pub use members::MemberStore;

use courier_types::{
    Event, EventContent, EventId, MembershipError, MembershipStore, RoomId, StateContent, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(RoomId),
    #[error("membership state key is not a user id: {0}")]
    InvalidStateKey(String),
    #[error("room store lock poisoned")]
    LockPoisoned,
}

type StateKey = (String, String);

#[derive(Debug)]
struct Room {
    state: RwLock<HashMap<StateKey, Arc<Event>>>,
}

/// In-memory room state store.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    members: MemberStore,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty room. Returns `true` if the room already existed, in
    /// which case it is left untouched.
    pub fn create_room(&self, id: &RoomId) -> Result<bool, RoomError> {
        let mut rooms = self.rooms.write().map_err(|_| RoomError::LockPoisoned)?;
        if rooms.contains_key(id) {
            return Ok(true);
        }
        rooms.insert(
            id.clone(),
            Arc::new(Room {
                state: RwLock::new(HashMap::new()),
            }),
        );
        tracing::debug!(room = %id, "room created");
        Ok(false)
    }

    pub fn room_exists(&self, id: &RoomId) -> Result<bool, RoomError> {
        let rooms = self.rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        Ok(rooms.contains_key(id))
    }

    /// Replaces the `(content type, state_key)` state of `room` and returns
    /// the new state event. The replaced content, if any, is carried as
    /// `prev_content`. Membership events also update the member index.
    pub fn set_room_state(
        &self,
        room: &RoomId,
        sender: &UserId,
        content: StateContent,
        state_key: &str,
    ) -> Result<Arc<Event>, RoomError> {
        let target = match &content {
            StateContent::Member { membership, .. } => Some((
                *membership,
                UserId::parse(state_key)
                    .map_err(|_| RoomError::InvalidStateKey(state_key.to_string()))?,
            )),
            _ => None,
        };

        let rooms = self.rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        let entry = rooms
            .get(room)
            .ok_or_else(|| RoomError::NotFound(room.clone()))?;
        let mut state = entry.state.write().map_err(|_| RoomError::LockPoisoned)?;

        let key = (content.event_type().to_string(), state_key.to_string());
        let prev_content = state.get(&key).and_then(|prev| match &prev.content {
            EventContent::State { content, .. } => Some(content.clone()),
            _ => None,
        });
        let event = Arc::new(Event::new(
            new_event_id(sender),
            Some(room.clone()),
            sender.clone(),
            EventContent::State {
                state_key: state_key.to_string(),
                content,
                prev_content,
            },
        ));
        state.insert(key, Arc::clone(&event));

        if let Some((membership, user)) = target {
            self.members.apply(room, &user, membership)?;
            tracing::debug!(room = %room, user = %user, membership = membership.as_str(), "membership changed");
        }
        Ok(event)
    }

    /// Current state event for `(event_type, state_key)`, if set.
    pub fn room_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<Arc<Event>>, RoomError> {
        let rooms = self.rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        let entry = rooms
            .get(room)
            .ok_or_else(|| RoomError::NotFound(room.clone()))?;
        let state = entry.state.read().map_err(|_| RoomError::LockPoisoned)?;
        Ok(state
            .get(&(event_type.to_string(), state_key.to_string()))
            .cloned())
    }

    /// Every current state event of `room`, ordered by type then state key.
    pub fn entire_room_state(&self, room: &RoomId) -> Result<Vec<Arc<Event>>, RoomError> {
        let rooms = self.rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        let entry = rooms
            .get(room)
            .ok_or_else(|| RoomError::NotFound(room.clone()))?;
        let state = entry.state.read().map_err(|_| RoomError::LockPoisoned)?;
        let mut entries: Vec<(&StateKey, &Arc<Event>)> = state.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Ok(entries.into_iter().map(|(_, event)| Arc::clone(event)).collect())
    }

    pub fn members(&self) -> &MemberStore {
        &self.members
    }
}

fn new_event_id(sender: &UserId) -> EventId {
    EventId::new(&uuid::Uuid::new_v4().simple().to_string(), sender.domain())
}

impl From<RoomError> for MembershipError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(room) => MembershipError::RoomNotFound(room),
            other => MembershipError::Unavailable(other.to_string()),
        }
    }
}

impl MembershipStore for RoomStore {
    fn users(&self, room: &RoomId) -> Result<Vec<UserId>, MembershipError> {
        if !self.room_exists(room)? {
            return Err(MembershipError::RoomNotFound(room.clone()));
        }
        Ok(self.members.members(room)?)
    }

    fn peers(&self, user: &UserId) -> Result<HashSet<UserId>, MembershipError> {
        Ok(self.members.peers(user)?)
    }

    fn rooms(&self, user: &UserId) -> Result<Vec<RoomId>, MembershipError> {
        Ok(self.members.rooms(user)?)
    }
}
