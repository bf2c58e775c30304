//! The event hub: one shard's logs, wired to the room store.

use courier_events::{
    CancelSignal, Counter, MessageLog, PresenceStream, Profile, SignalBuffer, StreamMux,
};
use courier_rooms::RoomStore;
use courier_types::{
    AsyncEventSink, Event, EventContent, EventId, Id, IndexedEvent, Membership, MembershipStore,
    PresenceState, RoomId, ShardId, StateContent, UserId, EVENT_TYPE_TYPING,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::{Config, SyncConfig};
use crate::SyncError;

/// Owns every log of one shard and exposes the write side of the server.
///
/// Reads (`sync`, `messages`) live in [`crate::sync`].
pub struct EventHub {
    pub(crate) shard: ShardId,
    pub(crate) limits: SyncConfig,
    pub(crate) rooms: Arc<RoomStore>,
    pub(crate) messages: MessageLog,
    pub(crate) signals: SignalBuffer,
    pub(crate) presence: PresenceStream,
    pub(crate) mux: Arc<StreamMux>,
    /// Users currently typing, per room.
    pub(crate) typing: Mutex<HashMap<RoomId, BTreeSet<UserId>>>,
    pub(crate) shutdown: CancelSignal,
}

impl EventHub {
    pub fn new(config: &Config, sink: Option<Arc<dyn AsyncEventSink>>) -> Self {
        let rooms = Arc::new(RoomStore::new());
        let members: Arc<dyn MembershipStore> = rooms.clone();
        let mux = Arc::new(StreamMux::new());

        Self {
            shard: ShardId(config.shard.id),
            limits: config.sync.clone(),
            messages: MessageLog::new(
                Arc::new(Counter::new(0)),
                members.clone(),
                sink.clone(),
                mux.clone(),
            ),
            signals: SignalBuffer::new(Arc::new(Counter::new(0))),
            presence: PresenceStream::new(Arc::new(Counter::new(0)), members, sink, mux.clone()),
            rooms,
            mux,
            typing: Mutex::new(HashMap::new()),
            shutdown: CancelSignal::new(),
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    /// Creates `room` with `creator` as its first member.
    ///
    /// Returns `false` without writing anything if the room already existed.
    pub fn create_room(&self, room: &RoomId, creator: &UserId) -> Result<bool, SyncError> {
        if self.rooms.create_room(room)? {
            return Ok(false);
        }
        self.set_state(
            creator,
            room,
            StateContent::Create {
                creator: creator.clone(),
            },
            "",
        )?;
        self.set_state(
            creator,
            room,
            StateContent::Member {
                membership: Membership::Join,
                displayname: None,
            },
            creator.as_str(),
        )?;
        tracing::info!(room = %room, creator = %creator, "room created");
        Ok(true)
    }

    /// Appends a message to the room timeline. The sender must be joined.
    pub fn send_message(
        &self,
        sender: &UserId,
        room: &RoomId,
        msgtype: &str,
        body: &str,
    ) -> Result<u64, SyncError> {
        self.require_member(sender, room)?;
        let event = Event::new(
            EventId::new(&uuid::Uuid::new_v4().simple().to_string(), sender.domain()),
            Some(room.clone()),
            sender.clone(),
            EventContent::Message {
                msgtype: msgtype.to_string(),
                body: body.to_string(),
            },
        );
        Ok(self.messages.send(event)?)
    }

    /// Replaces a piece of room state and appends the state event to the
    /// timeline. Membership changes take effect before the event is routed,
    /// so a joining user receives their own join.
    pub fn set_state(
        &self,
        sender: &UserId,
        room: &RoomId,
        content: StateContent,
        state_key: &str,
    ) -> Result<u64, SyncError> {
        let event = self.rooms.set_room_state(room, sender, content, state_key)?;
        Ok(self.messages.send(Event::clone(&event))?)
    }

    /// Marks `user` as typing or not typing in `room`.
    ///
    /// Every room has one typing signal identity, so each update supersedes
    /// the previous one in every member's signal segment.
    pub fn set_typing(&self, user: &UserId, room: &RoomId, typing: bool) -> Result<u64, SyncError> {
        self.require_member(user, room)?;
        let user_ids: Vec<UserId> = {
            let mut rooms = self.typing.lock().map_err(|_| SyncError::LockPoisoned)?;
            let typing_users = rooms.entry(room.clone()).or_default();
            if typing {
                typing_users.insert(user.clone());
            } else {
                typing_users.remove(user);
            }
            typing_users.iter().cloned().collect()
        };

        let members = self.rooms.users(room)?;
        let recipients: Vec<Id> = members.iter().map(Id::from).collect();
        let event = Event::new(
            typing_event_id(room),
            Some(room.clone()),
            user.clone(),
            EventContent::Typing { user_ids },
        );
        let index = self.signals.push_signal(event.info(), &recipients)?;
        if let Err(e) = self
            .mux
            .send(&members, &IndexedEvent::new(index, Arc::new(event)))
        {
            tracing::warn!(index, "failed to multiplex typing signal: {}", e);
        }
        Ok(index)
    }

    /// Users typing in `room` right now, sorted.
    pub fn typing_users(&self, room: &RoomId) -> Result<Vec<UserId>, SyncError> {
        let rooms = self.typing.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(rooms
            .get(room)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn set_presence(
        &self,
        user: &UserId,
        presence: PresenceState,
        status_msg: Option<String>,
    ) -> Result<u64, SyncError> {
        Ok(self.presence.set_presence(user, presence, status_msg)?.index)
    }

    pub fn set_profile(&self, user: &UserId, profile: Profile) -> Result<u64, SyncError> {
        Ok(self.presence.set_profile(user, profile)?.index)
    }

    /// Resolves every outstanding long-poll with an empty result.
    pub fn shutdown(&self) {
        tracing::info!("cancelling outstanding long-polls");
        self.shutdown.cancel();
    }

    fn require_member(&self, user: &UserId, room: &RoomId) -> Result<(), SyncError> {
        if !self.rooms.room_exists(room)? {
            return Err(SyncError::NotFound(room.clone()));
        }
        if !self.rooms.members().is_member(room, user)? {
            return Err(SyncError::Forbidden {
                user: user.clone(),
                room: room.clone(),
            });
        }
        Ok(())
    }
}

/// The fixed signal identity of a room's typing notifications.
pub(crate) fn typing_event_id(room: &RoomId) -> EventId {
    EventId::new(&format!("{EVENT_TYPE_TYPING}.{}", room.localpart()), room.domain())
}
