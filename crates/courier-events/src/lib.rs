//! Event distribution core for the Courier chat server.
//!
//! Every write is stamped with an index from a shared [`Counter`] and
//! recorded in one of the logs below; readers page through a log with
//! half-open index ranges, and live readers park on the [`StreamMux`] until
//! the next event addressed to them arrives.
//!
//! # Logs
//!
//! | Log | Write | Read |
//! |-----|-------|------|
//! | [`FanOutLog`] | one entry, many recipients | one recipient, index range |
//! | [`FanInLog`] | one entry, one recipient | many recipients merged, or one recipient by position |
//! | [`MessageLog`] | room timeline event | rooms and extra-recipient events, either direction |
//! | [`SignalBuffer`] | ephemeral signal, many recipients | one recipient, index range |
//! | [`PresenceStream`] | per-user presence record | latest record of a user set |
//!
//! The fan-out log and the signal buffer update entries in place by event
//! id; the message log tombstones the previous entry and appends.
//!
//! No log calls a collaborator ([`MembershipStore`](courier_types::MembershipStore),
//! [`AsyncEventSink`](courier_types::AsyncEventSink) or the multiplexer) while
//! holding its own lock.

mod counter;
mod error;
mod fan_in;
mod fan_out;
mod messages;
mod mux;
mod presence;
mod segment;
mod signal;

pub use counter::Counter;
pub use error::EventError;
pub use fan_in::FanInLog;
pub use fan_out::FanOutLog;
pub use messages::MessageLog;
pub use mux::{CancelSignal, Listener, StreamMux};
pub use presence::{PresenceStream, Profile};
pub use signal::SignalBuffer;

use courier_types::{EventInfo, IndexedEvent, RoomId, UserId};
use std::collections::HashSet;

/// Result of a fan-out or fan-in select: the entries plus the cursors the
/// select actually covered, after clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub events: Vec<EventInfo>,
    pub from: u64,
    pub to: u64,
}

impl Selection {
    pub(crate) fn empty(from: u64, to: u64) -> Self {
        Self {
            events: Vec::new(),
            from,
            to,
        }
    }
}

/// A log that can be paged by index on behalf of a user.
pub trait EventSource: Send + Sync {
    /// One past the highest index handed out so far.
    fn max(&self) -> u64;

    /// Events visible through the given user, user set and room set, with
    /// index between `from` and `to`, at most `limit` of them.
    fn range(
        &self,
        user: Option<&UserId>,
        users: &HashSet<UserId>,
        rooms: &HashSet<RoomId>,
        from: u64,
        to: u64,
        limit: usize,
    ) -> Result<Vec<IndexedEvent>, EventError>;
}
