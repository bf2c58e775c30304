//! Fan-in log: each write goes to one recipient, reads merge many recipients.

use courier_types::{EventInfo, Id, IndexedEventInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::counter::Counter;
use crate::error::EventError;
use crate::Selection;

#[derive(Debug)]
pub struct FanInLog {
    segments: RwLock<HashMap<Id, Vec<IndexedEventInfo>>>,
    counter: Arc<Counter>,
}

impl FanInLog {
    pub fn new(counter: Arc<Counter>) -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
            counter,
        }
    }

    /// Appends `info` to the recipient's segment and returns its index.
    pub fn send(&self, info: EventInfo, recipient: &Id) -> Result<u64, EventError> {
        let mut segments = self.segments.write().map_err(|_| EventError::LockPoisoned)?;
        let index = self.counter.next_index();
        segments
            .entry(recipient.clone())
            .or_default()
            .push(IndexedEventInfo::new(info, index));
        Ok(index)
    }

    /// Most-recent-first page of one recipient's segment.
    ///
    /// `from` and `to` are positions in the segment rather than log indices:
    /// the result covers positions `[to, from)`, with `from` clamped to the
    /// segment length.
    ///
    /// # Panics
    ///
    /// Panics if `from < to`.
    pub fn select_backwards(
        &self,
        recipient: &Id,
        from: u64,
        to: u64,
    ) -> Result<Selection, EventError> {
        assert!(from >= to, "invalid arguments: from < to ({from} < {to})");
        let segments = self.segments.read().map_err(|_| EventError::LockPoisoned)?;
        let Some(segment) = segments.get(recipient) else {
            return Ok(Selection::empty(0, 0));
        };

        let from = from.min(segment.len() as u64);
        if from <= to {
            return Ok(Selection::empty(from, from));
        }
        let events = segment[to as usize..from as usize]
            .iter()
            .rev()
            .map(|entry| entry.info.clone())
            .collect();
        Ok(Selection { events, from, to })
    }

    /// Chronological merge of several recipients' entries with index in
    /// `[from, to)`, `to` clamped to [`FanInLog::max`].
    ///
    /// # Panics
    ///
    /// Panics if `from > to`.
    pub fn select_forwards(
        &self,
        recipients: &[Id],
        from: u64,
        to: u64,
    ) -> Result<Selection, EventError> {
        assert!(from <= to, "invalid arguments: from > to ({from} > {to})");
        let segments = self.segments.read().map_err(|_| EventError::LockPoisoned)?;
        let to = to.min(self.counter.current());
        if from >= to {
            return Ok(Selection::empty(to, to));
        }

        let mut merged: Vec<&IndexedEventInfo> = Vec::new();
        for segment in recipients.iter().filter_map(|r| segments.get(r)) {
            for entry in segment.iter().rev() {
                if entry.index >= to {
                    continue;
                }
                if entry.index < from {
                    break;
                }
                merged.push(entry);
            }
        }
        merged.sort_by_key(|entry| entry.index);

        let events = merged.into_iter().map(|entry| entry.info.clone()).collect();
        Ok(Selection { events, from, to })
    }

    pub fn max(&self) -> u64 {
        self.counter.current()
    }
}
