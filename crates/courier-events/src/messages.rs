//! Global message log: the room timeline of one shard.

use courier_types::{
    AsyncEventSink, Event, EventId, IndexedEvent, MembershipStore, RoomId, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::counter::Counter;
use crate::error::EventError;
use crate::mux::StreamMux;
use crate::EventSource;

#[derive(Debug, Clone)]
struct Slot {
    event: Arc<Event>,
    room: RoomId,
    /// Computed once at write time.
    extra_recipient: Option<UserId>,
}

#[derive(Debug, Default)]
struct Timeline {
    /// Keyed by index. Indices taken by other logs sharing the counter, and
    /// superseded entries, have no slot.
    slots: BTreeMap<u64, Slot>,
    by_id: HashMap<EventId, u64>,
}

/// Index-addressed log of every room event, with visibility checks.
///
/// Writing an event whose id is already present tombstones the old entry and
/// stores the new one at a fresh, later index.
pub struct MessageLog {
    timeline: RwLock<Timeline>,
    counter: Arc<Counter>,
    members: Arc<dyn MembershipStore>,
    sink: Option<Arc<dyn AsyncEventSink>>,
    mux: Arc<StreamMux>,
}

impl MessageLog {
    pub fn new(
        counter: Arc<Counter>,
        members: Arc<dyn MembershipStore>,
        sink: Option<Arc<dyn AsyncEventSink>>,
        mux: Arc<StreamMux>,
    ) -> Self {
        Self {
            timeline: RwLock::new(Timeline::default()),
            counter,
            members,
            sink,
            mux,
        }
    }

    /// Records `event` and pushes it to every user who can see it.
    ///
    /// The recipients are the room's current members plus the event's extra
    /// recipient, if any. A membership store failure is returned after the
    /// event has been recorded; delivery failures are only logged.
    pub fn send(&self, event: Event) -> Result<u64, EventError> {
        let room = event.room_id.clone().ok_or_else(|| {
            EventError::InvalidArgument(format!("event {} has no room", event.event_id))
        })?;
        let extra_recipient = event.extra_recipient();
        let event = Arc::new(event);

        let index = {
            let mut timeline = self.timeline.write().map_err(|_| EventError::LockPoisoned)?;
            let index = self.counter.next_index();
            if let Some(old) = timeline.by_id.insert(event.event_id.clone(), index) {
                timeline.slots.remove(&old);
            }
            timeline.slots.insert(
                index,
                Slot {
                    event: Arc::clone(&event),
                    room: room.clone(),
                    extra_recipient: extra_recipient.clone(),
                },
            );
            index
        };

        let mut recipients = self.members.users(&room)?;
        if let Some(extra) = extra_recipient {
            if !recipients.contains(&extra) {
                recipients.push(extra);
            }
        }

        tracing::debug!(
            index,
            room = %room,
            event_type = event.event_type(),
            recipients = recipients.len(),
            "message recorded"
        );

        let indexed = IndexedEvent::new(index, event);
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.send(&recipients, &indexed) {
                tracing::warn!(index, "failed to hand event to async sink: {}", e);
            }
        }
        if let Err(e) = self.mux.send(&recipients, &indexed) {
            tracing::warn!(index, "failed to multiplex event: {}", e);
        }
        Ok(index)
    }

    /// Looks up an event by id on behalf of `user`.
    ///
    /// Returns `None` for unknown or superseded ids, and for events the user
    /// may not see: they must be the event's extra recipient or a current
    /// member of its room.
    pub fn event(&self, user: &UserId, event_id: &EventId) -> Result<Option<Arc<Event>>, EventError> {
        let slot = {
            let timeline = self.timeline.read().map_err(|_| EventError::LockPoisoned)?;
            let Some(&index) = timeline.by_id.get(event_id) else {
                return Ok(None);
            };
            match timeline.slots.get(&index) {
                Some(slot) => slot.clone(),
                None => return Ok(None),
            }
        };

        if slot.extra_recipient.as_ref() == Some(user) {
            return Ok(Some(slot.event));
        }
        let rooms = self.members.rooms(user)?;
        if rooms.contains(&slot.room) {
            Ok(Some(slot.event))
        } else {
            Ok(None)
        }
    }

    pub fn max(&self) -> u64 {
        self.counter.current()
    }
}

impl EventSource for MessageLog {
    fn max(&self) -> u64 {
        self.counter.current()
    }

    /// Chronological when `from < to`, reverse-chronological when `from > to`.
    ///
    /// A forward range visits `[from, min(to, max))`; a reverse range starts
    /// one below `min(from, max)` and visits down to `to` inclusive. An entry
    /// is included when its room is in `rooms`, or otherwise when `user` is
    /// its extra recipient. `users` is not consulted.
    fn range(
        &self,
        user: Option<&UserId>,
        _users: &HashSet<UserId>,
        rooms: &HashSet<RoomId>,
        from: u64,
        to: u64,
        limit: usize,
    ) -> Result<Vec<IndexedEvent>, EventError> {
        let timeline = self.timeline.read().map_err(|_| EventError::LockPoisoned)?;
        let max = self.counter.current();
        let mut result = Vec::new();
        if limit == 0 || from == to {
            return Ok(result);
        }

        let visible = |(&index, slot): (&u64, &Slot)| -> Option<IndexedEvent> {
            let included = rooms.contains(&slot.room)
                || (user.is_some() && slot.extra_recipient.as_ref() == user);
            included.then(|| IndexedEvent::new(index, Arc::clone(&slot.event)))
        };

        if to < from {
            let start = from.min(max);
            if start <= to {
                return Ok(result);
            }
            result.extend(
                timeline
                    .slots
                    .range(to..start)
                    .rev()
                    .filter_map(visible)
                    .take(limit),
            );
        } else {
            let end = to.min(max);
            if from >= end {
                return Ok(result);
            }
            result.extend(
                timeline
                    .slots
                    .range(from..end)
                    .filter_map(visible)
                    .take(limit),
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{
        DeliveryError, EventContent, Membership, MembershipError, StateContent,
    };
    use std::sync::Mutex;

    /// Fixed membership: room name to member names.
    #[derive(Default)]
    struct StaticMembers {
        rooms: HashMap<RoomId, Vec<UserId>>,
        fail: bool,
    }

    impl StaticMembers {
        fn with(rooms: &[(&str, &[&str])]) -> Self {
            let rooms = rooms
                .iter()
                .map(|(room, users)| (room_id(room), users.iter().map(|u| user(u)).collect()))
                .collect();
            Self { rooms, fail: false }
        }
    }

    impl MembershipStore for StaticMembers {
        fn users(&self, room: &RoomId) -> Result<Vec<UserId>, MembershipError> {
            if self.fail {
                return Err(MembershipError::Unavailable("offline".to_string()));
            }
            Ok(self.rooms.get(room).cloned().unwrap_or_default())
        }

        fn peers(&self, user: &UserId) -> Result<HashSet<UserId>, MembershipError> {
            let mut peers: HashSet<UserId> = self
                .rooms
                .values()
                .filter(|members| members.contains(user))
                .flatten()
                .cloned()
                .collect();
            peers.insert(user.clone());
            Ok(peers)
        }

        fn rooms(&self, user: &UserId) -> Result<Vec<RoomId>, MembershipError> {
            Ok(self
                .rooms
                .iter()
                .filter(|(_, members)| members.contains(user))
                .map(|(room, _)| room.clone())
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(Vec<UserId>, u64)>>,
        fail: bool,
    }

    impl AsyncEventSink for RecordingSink {
        fn send(&self, recipients: &[UserId], event: &IndexedEvent) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push((recipients.to_vec(), event.index));
            if self.fail {
                Err(DeliveryError("bridge down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn user(name: &str) -> UserId {
        UserId::new(name, "test")
    }

    fn room_id(name: &str) -> RoomId {
        RoomId::new(name, "test")
    }

    fn message(id: &str, room: &str) -> Event {
        Event::new(
            EventId::new(id, "test"),
            Some(room_id(room)),
            user("alice"),
            EventContent::Message {
                msgtype: "m.text".to_string(),
                body: id.to_string(),
            },
        )
    }

    fn invite(id: &str, room: &str, target: &str) -> Event {
        Event::new(
            EventId::new(id, "test"),
            Some(room_id(room)),
            user("alice"),
            EventContent::State {
                state_key: user(target).to_string(),
                content: StateContent::Member {
                    membership: Membership::Invite,
                    displayname: None,
                },
                prev_content: None,
            },
        )
    }

    fn log_with(members: StaticMembers, sink: Option<Arc<dyn AsyncEventSink>>) -> MessageLog {
        MessageLog::new(
            Arc::new(Counter::new(0)),
            Arc::new(members),
            sink,
            Arc::new(StreamMux::new()),
        )
    }

    fn ids(events: &[IndexedEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event.event_id.localpart()).collect()
    }

    fn room_set(names: &[&str]) -> HashSet<RoomId> {
        names.iter().map(|n| room_id(n)).collect()
    }

    #[test]
    fn send_assigns_sequential_indices() {
        let log = log_with(StaticMembers::with(&[("room1", &["alice"])]), None);
        assert_eq!(log.send(message("e1", "room1")).unwrap(), 0);
        assert_eq!(log.send(message("e2", "room1")).unwrap(), 1);
        assert_eq!(log.max(), 2);
    }

    #[test]
    fn send_without_room_is_invalid() {
        let log = log_with(StaticMembers::default(), None);
        let mut event = message("e1", "room1");
        event.room_id = None;
        assert!(matches!(log.send(event), Err(EventError::InvalidArgument(_))));
        assert_eq!(log.max(), 0);
    }

    #[test]
    fn membership_failure_propagates_unchanged() {
        let mut members = StaticMembers::with(&[("room1", &["alice"])]);
        members.fail = true;
        let log = log_with(members, None);
        let err = log.send(message("e1", "room1")).unwrap_err();
        assert!(matches!(
            err,
            EventError::Membership(MembershipError::Unavailable(_))
        ));
    }

    #[test]
    fn sink_receives_members_and_extra_recipient() {
        let sink = Arc::new(RecordingSink::default());
        let log = log_with(
            StaticMembers::with(&[("room1", &["alice", "bob"])]),
            Some(sink.clone() as Arc<dyn AsyncEventSink>),
        );
        log.send(invite("i1", "room1", "carol")).unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (recipients, index) = &sent[0];
        assert_eq!(*index, 0);
        assert_eq!(recipients.len(), 3);
        assert!(recipients.contains(&user("carol")));
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let log = log_with(
            StaticMembers::with(&[("room1", &["alice"])]),
            Some(sink.clone() as Arc<dyn AsyncEventSink>),
        );
        assert_eq!(log.send(message("e1", "room1")).unwrap(), 0);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn event_visibility() {
        let log = log_with(
            StaticMembers::with(&[("room1", &["alice"]), ("room2", &["bob"])]),
            None,
        );
        log.send(message("e1", "room1")).unwrap();
        log.send(invite("i1", "room1", "bob")).unwrap();

        let e1 = EventId::new("e1", "test");
        let i1 = EventId::new("i1", "test");
        assert!(log.event(&user("alice"), &e1).unwrap().is_some());
        assert!(log.event(&user("bob"), &e1).unwrap().is_none());
        assert!(log.event(&user("bob"), &i1).unwrap().is_some());
        assert!(log
            .event(&user("alice"), &EventId::new("missing", "test"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn resend_tombstones_previous_slot() {
        let log = log_with(StaticMembers::with(&[("room1", &["alice"])]), None);
        log.send(message("e1", "room1")).unwrap();
        log.send(message("e2", "room1")).unwrap();
        let index = log.send(message("e1", "room1")).unwrap();
        assert_eq!(index, 2);

        let rooms = room_set(&["room1"]);
        let all = log
            .range(None, &HashSet::new(), &rooms, 0, 10, 10)
            .unwrap();
        assert_eq!(ids(&all), vec!["e2", "e1"]);
        assert_eq!(all[1].index, 2);

        let found = log
            .event(&user("alice"), &EventId::new("e1", "test"))
            .unwrap()
            .expect("re-sent event should be visible");
        assert_eq!(found.event_id.localpart(), "e1");
    }

    #[test]
    fn range_forward_and_reverse() {
        let log = log_with(
            StaticMembers::with(&[("room1", &["alice"]), ("room2", &["alice"])]),
            None,
        );
        for (id, room) in [("e0", "room1"), ("e1", "room2"), ("e2", "room1"), ("e3", "room1")] {
            log.send(message(id, room)).unwrap();
        }
        let rooms = room_set(&["room1"]);
        let users = HashSet::new();

        let forward = log.range(None, &users, &rooms, 0, 10, 10).unwrap();
        assert_eq!(ids(&forward), vec!["e0", "e2", "e3"]);

        let limited = log.range(None, &users, &rooms, 0, 10, 2).unwrap();
        assert_eq!(ids(&limited), vec!["e0", "e2"]);

        let window = log.range(None, &users, &rooms, 1, 3, 10).unwrap();
        assert_eq!(ids(&window), vec!["e2"]);

        let reverse = log.range(None, &users, &rooms, 10, 0, 10).unwrap();
        assert_eq!(ids(&reverse), vec!["e3", "e2", "e0"]);

        // Reverse visits down to `to` inclusive.
        let reverse = log.range(None, &users, &rooms, 4, 2, 10).unwrap();
        assert_eq!(ids(&reverse), vec!["e3", "e2"]);

        let reverse = log.range(None, &users, &rooms, 4, 0, 1).unwrap();
        assert_eq!(ids(&reverse), vec!["e3"]);

        assert!(log.range(None, &users, &rooms, 2, 2, 10).unwrap().is_empty());
        assert!(log.range(None, &users, &rooms, 0, 0, 10).unwrap().is_empty());
    }

    #[test]
    fn range_includes_extra_recipient_events() {
        let log = log_with(StaticMembers::with(&[("room1", &["alice"])]), None);
        log.send(message("e0", "room1")).unwrap();
        log.send(invite("i1", "room1", "bob")).unwrap();

        let none = HashSet::new();
        let bob = user("bob");
        let seen = log.range(Some(&bob), &HashSet::new(), &none, 0, 10, 10).unwrap();
        assert_eq!(ids(&seen), vec!["i1"]);

        let anonymous = log.range(None, &HashSet::new(), &none, 0, 10, 10).unwrap();
        assert!(anonymous.is_empty());
    }

    #[test]
    fn counter_may_start_far_from_zero() {
        let start = 1 << 62;
        let log = MessageLog::new(
            Arc::new(Counter::new(start)),
            Arc::new(StaticMembers::with(&[("room1", &["alice"])])),
            None,
            Arc::new(StreamMux::new()),
        );
        assert_eq!(log.send(message("e0", "room1")).unwrap(), start);
        assert_eq!(log.send(message("e1", "room1")).unwrap(), start + 1);
        assert_eq!(log.send(message("e0", "room1")).unwrap(), start + 2);

        let rooms = room_set(&["room1"]);
        let users = HashSet::new();
        let forward = log.range(None, &users, &rooms, start, u64::MAX, 10).unwrap();
        assert_eq!(ids(&forward), vec!["e1", "e0"]);
        assert_eq!(forward[1].index, start + 2);

        let reverse = log.range(None, &users, &rooms, u64::MAX, 0, 10).unwrap();
        assert_eq!(ids(&reverse), vec!["e0", "e1"]);
        assert!(log.range(None, &users, &rooms, 0, start, 10).unwrap().is_empty());

        let alice = user("alice");
        let edited = log.event(&alice, &EventId::new("e0", "test")).unwrap();
        assert!(edited.is_some());
    }

    #[test]
    fn range_skips_indices_taken_by_other_logs() {
        let counter = Arc::new(Counter::new(0));
        let log = MessageLog::new(
            Arc::clone(&counter),
            Arc::new(StaticMembers::with(&[("room1", &["alice"])])),
            None,
            Arc::new(StreamMux::new()),
        );
        log.send(message("e0", "room1")).unwrap();
        counter.increment();
        log.send(message("e2", "room1")).unwrap();
        counter.increment();

        let rooms = room_set(&["room1"]);
        let all = log.range(None, &HashSet::new(), &rooms, 0, 10, 10).unwrap();
        assert_eq!(all.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 2]);
        let reverse = log.range(None, &HashSet::new(), &rooms, 10, 0, 10).unwrap();
        assert_eq!(reverse.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 0]);
    }

    #[tokio::test]
    async fn send_wakes_listening_members() {
        let mux = Arc::new(StreamMux::new());
        let log = MessageLog::new(
            Arc::new(Counter::new(0)),
            Arc::new(StaticMembers::with(&[("room1", &["alice", "bob"])])),
            None,
            Arc::clone(&mux),
        );
        let cancel = crate::CancelSignal::new();
        let bob = mux.listen(&user("bob"), &cancel).unwrap();
        let carol = mux.listen(&user("carol"), &cancel).unwrap();

        log.send(message("e0", "room1")).unwrap();
        cancel.cancel();

        assert_eq!(bob.wait().await.map(|e| e.index), Some(0));
        assert!(carol.wait().await.is_none());
    }
}
