//! Error types for the event logs.

use courier_types::MembershipError;

/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The membership store failed; surfaced unchanged.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// A caller-supplied argument violated an operation's precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A log lock was poisoned by a panicking writer.
    #[error("event log lock poisoned")]
    LockPoisoned,
}
