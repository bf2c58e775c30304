//! Fan-out log: one write visible to many recipients, read per recipient.

use courier_types::{EventInfo, Id};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::counter::Counter;
use crate::error::EventError;
use crate::segment::Segment;
use crate::Selection;

#[derive(Debug)]
pub struct FanOutLog {
    segments: RwLock<HashMap<Id, Segment>>,
    counter: Arc<Counter>,
}

impl FanOutLog {
    pub fn new(counter: Arc<Counter>) -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
            counter,
        }
    }

    /// Records `info` for every recipient and returns the index assigned to
    /// it. A recipient that already holds an entry with the same event id has
    /// that entry overwritten in place.
    pub fn send(&self, info: EventInfo, recipients: &[Id]) -> Result<u64, EventError> {
        let mut segments = self.segments.write().map_err(|_| EventError::LockPoisoned)?;
        let index = self.counter.next_index();
        for recipient in recipients {
            segments
                .entry(recipient.clone())
                .or_default()
                .upsert(info.clone(), index);
        }
        tracing::trace!(index, recipients = recipients.len(), "fan-out entry recorded");
        Ok(index)
    }

    /// Records a batch of entries under a single write lock and returns their
    /// indices in batch order. Later entries in the batch win over earlier
    /// ones with the same event id.
    pub fn send_many(&self, batch: Vec<(EventInfo, Vec<Id>)>) -> Result<Vec<u64>, EventError> {
        let mut segments = self.segments.write().map_err(|_| EventError::LockPoisoned)?;
        let mut indices = Vec::with_capacity(batch.len());
        for (info, recipients) in batch {
            let index = self.counter.next_index();
            for recipient in recipients {
                segments.entry(recipient).or_default().upsert(info.clone(), index);
            }
            indices.push(index);
        }
        tracing::trace!(entries = indices.len(), "fan-out batch recorded");
        Ok(indices)
    }

    /// Up to `limit` entries for `recipient` with index in `[from, to)`,
    /// ordered by index.
    ///
    /// Bounds are clamped exactly as in [`FanOutLog::select_forwards`]. When
    /// more than `limit` entries match, the returned `to` is one past the
    /// last entry returned, ready to be passed back as the next `from`.
    ///
    /// # Panics
    ///
    /// Panics if `from > to`.
    pub fn range(
        &self,
        recipient: &Id,
        from: u64,
        to: u64,
        limit: usize,
    ) -> Result<Selection, EventError> {
        assert!(from <= to, "invalid arguments: from > to ({from} > {to})");
        if from == to || limit == 0 {
            return Ok(Selection::empty(from, from));
        }

        let segments = self.segments.read().map_err(|_| EventError::LockPoisoned)?;
        let to = to.min(self.counter.current());
        if from >= to {
            return Ok(Selection::empty(to, to));
        }

        let Some(segment) = segments.get(recipient) else {
            return Ok(Selection::empty(from, to));
        };
        // Updates in place can leave segment order out of index order.
        let mut entries: Vec<_> = segment.in_range(from, to).collect();
        entries.sort_by_key(|entry| entry.index);

        let to = match entries.get(limit) {
            Some(_) => entries[limit - 1].index + 1,
            None => to,
        };
        let events = entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.info.clone())
            .collect();
        Ok(Selection { events, from, to })
    }

    /// Entries for `recipient` with index in `[from, to)`, in segment order.
    ///
    /// # Panics
    ///
    /// Panics if `from > to`.
    pub fn select_forwards(
        &self,
        recipient: &Id,
        from: u64,
        to: u64,
    ) -> Result<Selection, EventError> {
        assert!(from <= to, "invalid arguments: from > to ({from} > {to})");
        if from == to {
            return Ok(Selection::empty(from, from));
        }

        let segments = self.segments.read().map_err(|_| EventError::LockPoisoned)?;
        let to = to.min(self.counter.current());
        if from >= to {
            return Ok(Selection::empty(to, to));
        }

        let Some(segment) = segments.get(recipient) else {
            return Ok(Selection::empty(from, to));
        };
        let events = segment
            .in_range(from, to)
            .map(|entry| entry.info.clone())
            .collect();
        Ok(Selection { events, from, to })
    }

    pub fn max(&self) -> u64 {
        self.counter.current()
    }
}
