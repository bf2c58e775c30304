//! Read side of the hub: long-poll sync and timeline pagination.

use courier_events::EventSource;
use courier_types::{
    Event, EventContent, Id, IndexedEvent, MembershipStore, RoomId, ShardTuple, StreamToken,
    UserId,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::EventHub;
use crate::SyncError;

/// Everything a user has pending since their last token.
#[derive(Debug, Clone, Default)]
pub struct SyncResponse {
    /// Timeline events, oldest first.
    pub events: Vec<IndexedEvent>,
    /// Current typing state of every room whose typing changed.
    pub typing: Vec<Event>,
    /// Latest presence of every peer whose presence changed, oldest first.
    pub presence: Vec<IndexedEvent>,
    /// Token to pass as `since` on the next sync.
    pub next_batch: String,
}

impl SyncResponse {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.typing.is_empty() && self.presence.is_empty()
    }
}

/// Pagination direction of [`EventHub::messages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl FromStr for Direction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" => Ok(Self::Forward),
            "b" => Ok(Self::Backward),
            other => Err(SyncError::InvalidArgument(format!(
                "direction must be 'f' or 'b', got '{other}'"
            ))),
        }
    }
}

/// One page of a room timeline.
#[derive(Debug, Clone)]
pub struct MessagesPage {
    pub chunk: Vec<IndexedEvent>,
    /// The `from` bound the page started at.
    pub start: u64,
    /// Pass as `from` to continue in the same direction.
    pub end: u64,
}

/// Per-log starting positions decoded from a `since` token.
#[derive(Debug, Clone, Copy, Default)]
struct Cursors {
    messages: u64,
    signals: u64,
    presence: u64,
}

impl EventHub {
    /// Returns what `user` has missed since `since`, waiting up to `timeout`
    /// for something to arrive if nothing is pending.
    ///
    /// A missing token syncs from the beginning. The wait ends early when the
    /// hub shuts down.
    pub async fn sync(
        &self,
        user: &UserId,
        since: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<SyncResponse, SyncError> {
        let cursors = match since {
            Some(token) => self.cursors(&StreamToken::parse(token).map_err(SyncError::Parse)?),
            None => Cursors::default(),
        };
        let timeout = self.limits.timeout(timeout);

        // Register before collecting so nothing written in between is missed.
        let listener = self.mux.listen(user, &self.shutdown)?;
        let response = self.collect(user, cursors)?;
        if !response.is_empty() || timeout.is_zero() || self.shutdown.is_cancelled() {
            return Ok(response);
        }

        tracing::trace!(user = %user, timeout_ms = timeout.as_millis() as u64, "waiting for events");
        if listener.wait_timeout(timeout).await.is_none() {
            // Timed out or shut down; the cursors stay where they were.
            return Ok(response);
        }
        self.collect(user, cursors)
    }

    /// Pages through `room`'s timeline on behalf of `user`.
    ///
    /// Forward pages default to `[0, max)`, backward pages to everything
    /// below `max`. A `to` bound on the wrong side of `from` is rejected.
    /// `end` is where the next page in the same direction starts.
    /// Users who are not joined only see events naming them as the extra
    /// recipient (e.g. their own invite).
    pub fn messages(
        &self,
        user: &UserId,
        room: &RoomId,
        from: Option<u64>,
        to: Option<u64>,
        dir: Direction,
        limit: Option<usize>,
    ) -> Result<MessagesPage, SyncError> {
        if !self.rooms.room_exists(room)? {
            return Err(SyncError::NotFound(room.clone()));
        }
        let limit = self.limits.limit(limit);
        let max = self.messages.max();
        let (from, to) = match dir {
            Direction::Forward => {
                let from = from.unwrap_or(0);
                let to = to.unwrap_or(max);
                if to < from {
                    return Err(SyncError::InvalidArgument(format!(
                        "forward pagination needs to >= from, got from={from} to={to}"
                    )));
                }
                (from, to)
            }
            Direction::Backward => {
                let from = from.unwrap_or(max);
                let to = to.unwrap_or(0);
                if to > from {
                    return Err(SyncError::InvalidArgument(format!(
                        "backward pagination needs to <= from, got from={from} to={to}"
                    )));
                }
                (from, to)
            }
        };

        let joined = self.rooms.members().is_member(room, user)?;
        let (viewer, rooms) = if joined {
            (None, HashSet::from([room.clone()]))
        } else {
            (Some(user), HashSet::new())
        };
        let visited = self
            .messages
            .range(viewer, &HashSet::new(), &rooms, from, to, limit)?;

        let end = match (dir, visited.last()) {
            (Direction::Forward, Some(last)) if visited.len() == limit => last.index + 1,
            (Direction::Backward, Some(last)) if visited.len() == limit => last.index,
            (Direction::Forward, _) => to.min(max).max(from),
            (Direction::Backward, _) => to,
        };
        let chunk = visited
            .into_iter()
            .filter(|e| e.event.room_id.as_ref() == Some(room))
            .collect();
        Ok(MessagesPage {
            chunk,
            start: from,
            end,
        })
    }

    fn cursors(&self, token: &StreamToken) -> Cursors {
        let rooms = token.room_tuple(self.shard).copied().unwrap_or_default();
        let users = token.user_tuple(self.shard).copied().unwrap_or_default();
        Cursors {
            messages: rooms.event_index,
            signals: rooms.signal_index,
            presence: users.event_index,
        }
    }

    fn collect(&self, user: &UserId, since: Cursors) -> Result<SyncResponse, SyncError> {
        let messages_max = self.messages.max();
        let signals_max = self.signals.max();
        let presence_max = self.presence.max();

        let rooms: HashSet<RoomId> = self.rooms.rooms(user)?.into_iter().collect();
        let limit = self.limits.limit(None);
        let events = if since.messages < messages_max {
            self.messages.range(
                Some(user),
                &HashSet::new(),
                &rooms,
                since.messages,
                messages_max,
                limit,
            )?
        } else {
            Vec::new()
        };
        // A full page means there is more; resume right after it.
        let messages_next = match events.last() {
            Some(last) if events.len() == limit => last.index + 1,
            _ => messages_max.max(since.messages),
        };

        let (signals, _) = self
            .signals
            .range(&Id::from(user), since.signals, signals_max)?;
        let mut typing = Vec::with_capacity(signals.len());
        for info in signals {
            let Ok(room) = RoomId::parse(info.context_id.as_str()) else {
                tracing::warn!(context = %info.context_id, "typing signal without a room context");
                continue;
            };
            let user_ids = self.typing_users(&room)?;
            typing.push(Event::new(
                info.event_id,
                Some(room),
                info.sender,
                EventContent::Typing { user_ids },
            ));
        }

        let peers = self.rooms.peers(user)?;
        let presence = self.presence.range(
            Some(user),
            &peers,
            &HashSet::new(),
            since.presence,
            presence_max,
            limit,
        )?;

        let token = StreamToken::new(
            vec![ShardTuple::new(
                self.shard,
                messages_next,
                signals_max.max(since.signals),
            )],
            vec![ShardTuple::new(
                self.shard,
                presence_max.max(since.presence),
                0,
            )],
        );
        let next_batch = token.encode().map_err(SyncError::Encode)?;

        tracing::debug!(
            user = %user,
            events = events.len(),
            typing = typing.len(),
            presence = presence.len(),
            next_batch = %next_batch,
            "sync collected"
        );
        Ok(SyncResponse {
            events,
            typing,
            presence,
            next_batch,
        })
    }
}
