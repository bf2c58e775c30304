//! Signal buffer: ephemeral per-user signals such as typing notifications.

use courier_types::{EventInfo, Id};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::counter::Counter;
use crate::error::EventError;
use crate::segment::Segment;

/// Per-recipient buffer of the latest signal per event identity.
///
/// Pushing a signal whose event id a recipient already holds replaces that
/// entry, so a recipient sees at most one entry per signal identity.
#[derive(Debug)]
pub struct SignalBuffer {
    segments: RwLock<HashMap<Id, Segment>>,
    counter: Arc<Counter>,
}

impl SignalBuffer {
    pub fn new(counter: Arc<Counter>) -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
            counter,
        }
    }

    pub fn push_signal(&self, info: EventInfo, recipients: &[Id]) -> Result<u64, EventError> {
        let mut segments = self.segments.write().map_err(|_| EventError::LockPoisoned)?;
        let index = self.counter.next_index();
        for recipient in recipients {
            segments
                .entry(recipient.clone())
                .or_default()
                .upsert(info.clone(), index);
        }
        tracing::trace!(index, recipients = recipients.len(), "signal pushed");
        Ok(index)
    }

    /// Signals for `recipient` with index in `[from, to)` in segment order,
    /// together with the highest index among them (0 when empty).
    pub fn range(
        &self,
        recipient: &Id,
        from: u64,
        to: u64,
    ) -> Result<(Vec<EventInfo>, u64), EventError> {
        if from >= to {
            return Ok((Vec::new(), 0));
        }
        let segments = self.segments.read().map_err(|_| EventError::LockPoisoned)?;
        let Some(segment) = segments.get(recipient) else {
            return Ok((Vec::new(), 0));
        };

        let mut max_index = 0;
        let events = segment
            .in_range(from, to)
            .map(|entry| {
                max_index = max_index.max(entry.index);
                entry.info.clone()
            })
            .collect();
        Ok((events, max_index))
    }

    pub fn max(&self) -> u64 {
        self.counter.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{EventId, UserId, EVENT_TYPE_TYPING};

    fn user(name: &str) -> Id {
        Id::from(UserId::new(name, "test"))
    }

    fn push(buffer: &SignalBuffer, id: &str, users: &[&str]) {
        let info = EventInfo::new(
            Id::new("!room1:test"),
            EventId::new(id, "test"),
            UserId::new("tester", "test"),
            EVENT_TYPE_TYPING,
        );
        let recipients: Vec<Id> = users.iter().map(|u| user(u)).collect();
        buffer.push_signal(info, &recipients).expect("push should succeed");
    }

    fn range(buffer: &SignalBuffer, name: &str, from: u64, to: u64, expected: &[&str]) {
        let (events, _) = buffer.range(&user(name), from, to).expect("range should succeed");
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.localpart()).collect();
        assert_eq!(ids, expected, "signals for {name} in [{from}, {to})");
    }

    #[test]
    fn range_scenario() {
        let buffer = SignalBuffer::new(Arc::new(Counter::new(0)));

        push(&buffer, "event1", &["user1", "user2"]);
        range(&buffer, "user1", 0, 2, &["event1"]);
        range(&buffer, "user2", 0, 1, &["event1"]);
        range(&buffer, "user1", 0, 0, &[]);
        range(&buffer, "user3", 0, 2, &[]);
        range(&buffer, "user1", 2, 0, &[]);

        push(&buffer, "event2", &["user1"]);
        range(&buffer, "user1", 0, 2, &["event1", "event2"]);
        range(&buffer, "user2", 0, 2, &["event1"]);

        push(&buffer, "event3", &["user1", "user3"]);
        range(&buffer, "user1", 0, 3, &["event1", "event2", "event3"]);
        range(&buffer, "user1", 0, 2, &["event1", "event2"]);
        range(&buffer, "user1", 1, 3, &["event2", "event3"]);
        range(&buffer, "user3", 0, 3, &["event3"]);
        assert_eq!(buffer.max(), 3);
    }

    #[test]
    fn range_reports_highest_index_seen() {
        let buffer = SignalBuffer::new(Arc::new(Counter::new(0)));
        push(&buffer, "a", &["user1"]);
        push(&buffer, "b", &["user2"]);
        push(&buffer, "c", &["user1"]);

        let (events, max_index) = buffer.range(&user("user1"), 0, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(max_index, 2);

        let (events, max_index) = buffer.range(&user("user3"), 0, 10).unwrap();
        assert!(events.is_empty());
        assert_eq!(max_index, 0);
    }

    #[test]
    fn repushed_signal_supersedes_previous_entry() {
        let buffer = SignalBuffer::new(Arc::new(Counter::new(0)));
        push(&buffer, "typing", &["user1"]);
        push(&buffer, "other", &["user1"]);
        push(&buffer, "typing", &["user1"]);

        range(&buffer, "user1", 0, 3, &["typing", "other"]);
        // Only the newer push is visible past the old index.
        range(&buffer, "user1", 2, 3, &["typing"]);
        range(&buffer, "user1", 0, 2, &["other"]);
    }
}
