//! Membership index: which users are joined to which rooms.

use courier_types::{Membership, RoomId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::RoomError;

/// Two-way index of joined members.
///
/// Lock ordering: `room_members` is always acquired before `user_rooms`.
/// Every method that touches both maps follows this order.
#[derive(Debug, Default)]
pub struct MemberStore {
    room_members: RwLock<HashMap<RoomId, HashSet<UserId>>>,
    user_rooms: RwLock<HashMap<UserId, HashSet<RoomId>>>,
}

impl MemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a membership transition. `Join` adds the user to the room,
    /// `Leave` and `Ban` remove them, `Invite` and `Knock` change nothing.
    pub fn apply(&self, room: &RoomId, user: &UserId, membership: Membership) -> Result<(), RoomError> {
        match membership {
            Membership::Join => self.join(room, user),
            Membership::Leave | Membership::Ban => self.leave(room, user),
            Membership::Invite | Membership::Knock => Ok(()),
        }
    }

    pub fn join(&self, room: &RoomId, user: &UserId) -> Result<(), RoomError> {
        let mut room_members = self.room_members.write().map_err(|_| RoomError::LockPoisoned)?;
        let mut user_rooms = self.user_rooms.write().map_err(|_| RoomError::LockPoisoned)?;
        room_members
            .entry(room.clone())
            .or_default()
            .insert(user.clone());
        user_rooms
            .entry(user.clone())
            .or_default()
            .insert(room.clone());
        Ok(())
    }

    pub fn leave(&self, room: &RoomId, user: &UserId) -> Result<(), RoomError> {
        let mut room_members = self.room_members.write().map_err(|_| RoomError::LockPoisoned)?;
        let mut user_rooms = self.user_rooms.write().map_err(|_| RoomError::LockPoisoned)?;
        if let Some(members) = room_members.get_mut(room) {
            members.remove(user);
            if members.is_empty() {
                room_members.remove(room);
            }
        }
        if let Some(rooms) = user_rooms.get_mut(user) {
            rooms.remove(room);
            if rooms.is_empty() {
                user_rooms.remove(user);
            }
        }
        Ok(())
    }

    pub fn is_member(&self, room: &RoomId, user: &UserId) -> Result<bool, RoomError> {
        let room_members = self.room_members.read().map_err(|_| RoomError::LockPoisoned)?;
        Ok(room_members
            .get(room)
            .is_some_and(|members| members.contains(user)))
    }

    /// Joined members of `room`, sorted.
    pub fn members(&self, room: &RoomId) -> Result<Vec<UserId>, RoomError> {
        let room_members = self.room_members.read().map_err(|_| RoomError::LockPoisoned)?;
        let mut members: Vec<UserId> = room_members
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    /// Rooms `user` is joined to, sorted.
    pub fn rooms(&self, user: &UserId) -> Result<Vec<RoomId>, RoomError> {
        let user_rooms = self.user_rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        let mut rooms: Vec<RoomId> = user_rooms
            .get(user)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        Ok(rooms)
    }

    /// Everyone sharing a room with `user`, `user` included.
    pub fn peers(&self, user: &UserId) -> Result<HashSet<UserId>, RoomError> {
        let room_members = self.room_members.read().map_err(|_| RoomError::LockPoisoned)?;
        let user_rooms = self.user_rooms.read().map_err(|_| RoomError::LockPoisoned)?;
        let mut peers: HashSet<UserId> = user_rooms
            .get(user)
            .into_iter()
            .flatten()
            .filter_map(|room| room_members.get(room))
            .flatten()
            .cloned()
            .collect();
        peers.insert(user.clone());
        Ok(peers)
    }
}
