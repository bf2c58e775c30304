//! Collaborator interfaces the event core depends on but does not implement.

use std::collections::HashSet;
use thiserror::Error;

use crate::event::IndexedEvent;
use crate::ids::{RoomId, UserId};

/// Errors returned by a [`MembershipStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("membership store unavailable: {0}")]
    Unavailable(String),
}

/// Answers membership questions for routing.
pub trait MembershipStore: Send + Sync {
    /// Users currently joined to `room`.
    fn users(&self, room: &RoomId) -> Result<Vec<UserId>, MembershipError>;

    /// Users sharing at least one room with `user`, including `user`.
    fn peers(&self, user: &UserId) -> Result<HashSet<UserId>, MembershipError>;

    /// Rooms `user` is currently joined to.
    fn rooms(&self, user: &UserId) -> Result<Vec<RoomId>, MembershipError>;
}

/// Error returned by an [`AsyncEventSink`] that failed to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Fire-and-forget delivery channel, e.g. a federation or push bridge.
pub trait AsyncEventSink: Send + Sync {
    fn send(&self, recipients: &[UserId], event: &IndexedEvent) -> Result<(), DeliveryError>;
}
