//! Presence stream: latest presence and profile per user.

use courier_types::{
    AsyncEventSink, Event, EventContent, EventId, IndexedEvent, MembershipStore, PresenceState,
    RoomId, UserId, UserPresence,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::counter::Counter;
use crate::error::EventError;
use crate::mux::StreamMux;
use crate::EventSource;

/// Profile fields of a user's presence record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub displayname: Option<String>,
    pub avatar_url: Option<String>,
}

/// Keeps one presence event per user, re-indexed on every update.
///
/// Updates are pushed to the user's peers (everyone sharing a room with
/// them, themselves included).
pub struct PresenceStream {
    records: RwLock<HashMap<UserId, IndexedEvent>>,
    counter: Arc<Counter>,
    members: Arc<dyn MembershipStore>,
    sink: Option<Arc<dyn AsyncEventSink>>,
    mux: Arc<StreamMux>,
}

impl PresenceStream {
    pub fn new(
        counter: Arc<Counter>,
        members: Arc<dyn MembershipStore>,
        sink: Option<Arc<dyn AsyncEventSink>>,
        mux: Arc<StreamMux>,
    ) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            counter,
            members,
            sink,
            mux,
        }
    }

    pub fn set_presence(
        &self,
        user: &UserId,
        presence: PresenceState,
        status_msg: Option<String>,
    ) -> Result<IndexedEvent, EventError> {
        self.update(user, |record| {
            record.presence = presence;
            record.status_msg = status_msg;
        })
    }

    pub fn set_profile(&self, user: &UserId, profile: Profile) -> Result<IndexedEvent, EventError> {
        self.update(user, |record| {
            record.displayname = profile.displayname;
            record.avatar_url = profile.avatar_url;
        })
    }

    /// Current presence record of `user`, or the default for unknown users.
    pub fn presence(&self, user: &UserId) -> Result<UserPresence, EventError> {
        let records = self.records.read().map_err(|_| EventError::LockPoisoned)?;
        Ok(records
            .get(user)
            .and_then(|indexed| match &indexed.event.content {
                EventContent::Presence(record) => Some(record.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }

    pub fn profile(&self, user: &UserId) -> Result<Profile, EventError> {
        let record = self.presence(user)?;
        Ok(Profile {
            displayname: record.displayname,
            avatar_url: record.avatar_url,
        })
    }

    pub fn max(&self) -> u64 {
        self.counter.current()
    }

    fn update<F>(&self, user: &UserId, apply: F) -> Result<IndexedEvent, EventError>
    where
        F: FnOnce(&mut UserPresence),
    {
        let indexed = {
            let mut records = self.records.write().map_err(|_| EventError::LockPoisoned)?;
            let mut record = match records.get(user).map(|indexed| &indexed.event.content) {
                Some(EventContent::Presence(record)) => record.clone(),
                _ => UserPresence::default(),
            };
            apply(&mut record);

            let index = self.counter.next_index();
            let event = Event::new(
                presence_event_id(user),
                None,
                user.clone(),
                EventContent::Presence(record),
            );
            let indexed = IndexedEvent::new(index, Arc::new(event));
            records.insert(user.clone(), indexed.clone());
            indexed
        };

        let peers: Vec<UserId> = self.members.peers(user)?.into_iter().collect();
        tracing::debug!(index = indexed.index, user = %user, peers = peers.len(), "presence updated");

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.send(&peers, &indexed) {
                tracing::warn!(index = indexed.index, "failed to hand presence to async sink: {}", e);
            }
        }
        if let Err(e) = self.mux.send(&peers, &indexed) {
            tracing::warn!(index = indexed.index, "failed to multiplex presence: {}", e);
        }
        Ok(indexed)
    }
}

/// Every presence update of a user shares one event id.
fn presence_event_id(user: &UserId) -> EventId {
    EventId::new(&format!("presence.{}", user.localpart()), user.domain())
}

impl EventSource for PresenceStream {
    fn max(&self) -> u64 {
        self.counter.current()
    }

    /// Latest presence of every user in `users` whose record index is in
    /// `[from, to)`, ordered by index. `user`, `rooms` and `limit` are not
    /// consulted.
    fn range(
        &self,
        _user: Option<&UserId>,
        users: &HashSet<UserId>,
        _rooms: &HashSet<RoomId>,
        from: u64,
        to: u64,
        _limit: usize,
    ) -> Result<Vec<IndexedEvent>, EventError> {
        if users.is_empty() || from >= to {
            return Ok(Vec::new());
        }
        let records = self.records.read().map_err(|_| EventError::LockPoisoned)?;
        let mut result: Vec<IndexedEvent> = users
            .iter()
            .filter_map(|user| records.get(user))
            .filter(|indexed| indexed.index >= from && indexed.index < to)
            .cloned()
            .collect();
        result.sort_by_key(|indexed| indexed.index);
        Ok(result)
    }
}
