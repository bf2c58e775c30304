//! Typed identifiers for users, rooms and events.
//!
//! Every identifier has the shape `<sigil><localpart>:<domain>`, where the
//! sigil is `@` for users, `!` for rooms and `$` for events. The untyped
//! [`Id`] is the recipient key used by the recipient-keyed logs, which do not
//! care what kind of entity they are indexing.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing an identifier string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The input was empty.
    #[error("identifier is empty")]
    Empty,

    /// The input did not start with the sigil required for its kind.
    #[error("identifier '{id}' must start with '{expected}'")]
    Sigil { id: String, expected: char },

    /// The input had no `:domain` part, or one of the parts was empty.
    #[error("identifier '{0}' must have the form <localpart>:<domain>")]
    MissingDomain(String),
}

macro_rules! sigil_id {
    ($(#[$meta:meta])* $name:ident, $sigil:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            full: String,
            colon: usize,
        }

        impl $name {
            /// The sigil that prefixes every identifier of this kind.
            pub const SIGIL: char = $sigil;

            /// Builds an identifier from its local part and domain.
            ///
            /// The result reads back exactly as [`Self::parse`] would read
            /// its text: a `:` inside `localpart` becomes the domain
            /// separator.
            pub fn new(localpart: &str, domain: &str) -> Self {
                let full = format!("{}{}:{}", Self::SIGIL, localpart, domain);
                let colon = full.find(':').unwrap_or(1 + localpart.len());
                Self { full, colon }
            }

            /// Parses an identifier of the form `<sigil><localpart>:<domain>`.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                if s.is_empty() {
                    return Err(IdError::Empty);
                }
                if !s.starts_with(Self::SIGIL) {
                    return Err(IdError::Sigil {
                        id: s.to_string(),
                        expected: Self::SIGIL,
                    });
                }
                match s.find(':') {
                    Some(colon) if colon > 1 && colon + 1 < s.len() => Ok(Self {
                        full: s.to_string(),
                        colon,
                    }),
                    _ => Err(IdError::MissingDomain(s.to_string())),
                }
            }

            /// The part between the sigil and the first `:`.
            pub fn localpart(&self) -> &str {
                &self.full[1..self.colon]
            }

            /// The part after the first `:`.
            pub fn domain(&self) -> &str {
                &self.full[self.colon + 1..]
            }

            /// The full textual form, sigil included.
            pub fn as_str(&self) -> &str {
                &self.full
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.full)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.full)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl From<$name> for Id {
            fn from(id: $name) -> Self {
                Id(id.full)
            }
        }

        impl From<&$name> for Id {
            fn from(id: &$name) -> Self {
                Id(id.full.clone())
            }
        }
    };
}

sigil_id!(
    /// A user identifier, e.g. `@alice:example.org`.
    UserId,
    '@'
);

sigil_id!(
    /// A room identifier, e.g. `!lobby:example.org`.
    RoomId,
    '!'
);

sigil_id!(
    /// An event identifier, e.g. `$k3j2:example.org`.
    EventId,
    '$'
);

/// Untyped recipient key.
///
/// The recipient-keyed logs index segments by `Id` so the same log can be
/// keyed by users in one deployment and by rooms in another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
