//! Courier server library: one shard of the event-distribution core.
//!
//! [`EventHub`] owns the message log, the typing signal buffer, the presence
//! stream, the stream multiplexer and the room store of one shard. Writes go
//! through the hub, which routes each event to the users allowed to see it;
//! reads are either a long-poll [`sync`](EventHub::sync) that resumes from a
//! stream token or a [`messages`](EventHub::messages) page of one room's
//! timeline.
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier_server::{config::Config, EventHub};
//!
//! let hub = EventHub::new(&Config::default(), None);
//! hub.create_room(&room, &alice)?;
//! hub.send_message(&alice, &room, "m.text", "hello")?;
//!
//! let first = hub.sync(&alice, None, Some(Duration::ZERO)).await?;
//! let next = hub.sync(&alice, Some(&first.next_batch), None).await?;
//! ```

pub mod config;
mod hub;
mod sink;
mod sync;

pub use hub::EventHub;
pub use sink::TracingSink;
pub use sync::{Direction, MessagesPage, SyncResponse};

use courier_events::EventError;
use courier_rooms::RoomError;
use courier_types::{MembershipError, RoomId, TokenError, UserId};
use thiserror::Error;

/// Errors returned by the hub's read and write operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The client sent a malformed stream token.
    #[error("malformed stream token: {0}")]
    Parse(#[source] TokenError),

    /// The room was never created.
    #[error("room not found: {0}")]
    NotFound(RoomId),

    /// A client-supplied argument is out of range or contradictory.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The user must be joined to the room for this operation.
    #[error("{user} is not a member of {room}")]
    Forbidden { user: UserId, room: RoomId },

    /// The next-batch token could not be encoded.
    #[error("cannot encode stream token: {0}")]
    Encode(#[source] TokenError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Events(#[from] EventError),

    #[error(transparent)]
    Rooms(RoomError),

    #[error("hub lock poisoned")]
    LockPoisoned,
}

impl From<RoomError> for SyncError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(room) => SyncError::NotFound(room),
            other => SyncError::Rooms(other),
        }
    }
}
