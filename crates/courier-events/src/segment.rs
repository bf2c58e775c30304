//! Per-recipient segment with update-in-place by event identity.

use courier_types::{EventId, EventInfo, IndexedEventInfo};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Segment {
    entries: Vec<IndexedEventInfo>,
    positions: HashMap<EventId, usize>,
}

impl Segment {
    /// Appends the entry, or overwrites the entry with the same event id
    /// while keeping its position.
    pub(crate) fn upsert(&mut self, info: EventInfo, index: u64) {
        match self.positions.get(&info.event_id) {
            Some(&pos) => self.entries[pos] = IndexedEventInfo::new(info, index),
            None => {
                self.positions.insert(info.event_id.clone(), self.entries.len());
                self.entries.push(IndexedEventInfo::new(info, index));
            }
        }
    }

    /// Entries with index in `[from, to)`, in segment order.
    pub(crate) fn in_range(&self, from: u64, to: u64) -> impl Iterator<Item = &IndexedEventInfo> {
        self.entries
            .iter()
            .filter(move |entry| entry.index >= from && entry.index < to)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Id, UserId};

    fn info(id: &str, event_type: &str) -> EventInfo {
        EventInfo::new(
            Id::new("!room:test"),
            EventId::new(id, "test"),
            UserId::new("alice", "test"),
            event_type,
        )
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut segment = Segment::default();
        segment.upsert(info("a", "t1"), 0);
        segment.upsert(info("b", "t1"), 1);
        segment.upsert(info("a", "t2"), 2);

        assert_eq!(segment.len(), 2);
        let all: Vec<_> = segment.in_range(0, 3).collect();
        assert_eq!(all[0].info.event_id, EventId::new("a", "test"));
        assert_eq!(all[0].index, 2);
        assert_eq!(all[0].info.event_type, "t2");
        assert_eq!(all[1].index, 1);
    }

    #[test]
    fn in_range_is_half_open() {
        let mut segment = Segment::default();
        for (n, id) in ["a", "b", "c"].into_iter().enumerate() {
            segment.upsert(info(id, "t"), n as u64);
        }
        let indices: Vec<_> = segment.in_range(1, 2).map(|e| e.index).collect();
        assert_eq!(indices, vec![1]);
        assert_eq!(segment.in_range(3, 10).count(), 0);
    }
}
