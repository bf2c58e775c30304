//! Stream token codec.
//!
//! A stream token is the cursor clients hand back to resume a range query.
//! It carries one tuple per shard, each tuple holding the shard id and two
//! per-shard indices:
//!
//! ```text
//! char      = "A"-"Z" | "a"-"z" | "0"-"9" | "-" | "_"
//! shard     = 1*2 char
//! index     = 1*8 char
//! tuple     = shard "." index "." index
//! group     = tuple *( "_" tuple )
//! token     = [ group ] [ "*" [ group ] ]
//! ```
//!
//! Values are base 64, most significant digit first: `A`-`Z` are 0-25,
//! `a`-`z` are 26-51, `0`-`9` are 52-61, `-` is 62 and `_` is 63. The
//! group before `*` holds the room cursors, the group after it the user
//! cursors. A token without `*` holds room cursors only.
//!
//! Because `_` is both a digit and the tuple separator, parsing splits on
//! `.` first: every chunk between two tuples is `<index>_<shard>`, and the
//! split happens at the last `_` in it. Indices may therefore contain `_`
//! freely; shard ids may only contain it in the first tuple of a group, which
//! [`StreamToken::encode`] enforces.

use std::str::FromStr;
use thiserror::Error;

pub const VALUE_SEPARATOR: char = '.';
pub const TUPLE_SEPARATOR: char = '_';
pub const GROUP_SEPARATOR: char = '*';

const MAX_SHARD_ID_LEN: usize = 2;
const MAX_INDEX_LEN: usize = 8;
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Errors produced by the stream token codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("failed to parse stream token: invalid character '{character}' at index {position}")]
    InvalidCharacter { character: char, position: usize },

    #[error("failed to parse stream token: invalid shard id length: {0}")]
    ShardIdLength(usize),

    #[error("failed to parse stream token: invalid index length: {0}")]
    IndexLength(usize),

    #[error("failed to parse stream token: invalid tuple '{0}'")]
    InvalidTuple(String),

    #[error("failed to parse stream token: more than one group separator")]
    TooManyGroups,

    #[error("cannot encode shard id {0} at a non-leading tuple position")]
    UnencodableShard(u32),

    #[error("cannot encode index {0}: it needs more than {MAX_INDEX_LEN} digits")]
    IndexOverflow(u64),
}

impl TokenError {
    /// True for errors raised while parsing client-supplied text, as opposed
    /// to errors raised while encoding a token built by the server.
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, Self::UnencodableShard(_) | Self::IndexOverflow(_))
    }
}

/// Identifies one independently sequenced shard.
///
/// Shard ids pack the shard count and the shard's position: the highest set
/// bit is the total shard count (a power of two) and the remaining bits are
/// the index, so `6` is shard 2 of 4 and `257` is shard 1 of 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn total_count(self) -> u32 {
        if self.0 == 0 {
            0
        } else {
            1 << (31 - self.0.leading_zeros())
        }
    }

    pub fn index(self) -> u32 {
        self.0 & !self.total_count()
    }
}

/// Cursor position within one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShardTuple {
    pub shard_id: ShardId,
    pub event_index: u64,
    pub signal_index: u64,
}

impl ShardTuple {
    pub fn new(shard_id: ShardId, event_index: u64, signal_index: u64) -> Self {
        Self {
            shard_id,
            event_index,
            signal_index,
        }
    }
}

/// Parsed stream token: room cursors and user cursors, one tuple per shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamToken {
    pub rooms: Vec<ShardTuple>,
    pub users: Vec<ShardTuple>,
}

impl StreamToken {
    pub fn new(rooms: Vec<ShardTuple>, users: Vec<ShardTuple>) -> Self {
        Self { rooms, users }
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty() && self.users.is_empty()
    }

    /// Room cursor for `shard`, if the token carries one.
    pub fn room_tuple(&self, shard: ShardId) -> Option<&ShardTuple> {
        self.rooms.iter().find(|t| t.shard_id == shard)
    }

    /// User cursor for `shard`, if the token carries one.
    pub fn user_tuple(&self, shard: ShardId) -> Option<&ShardTuple> {
        self.users.iter().find(|t| t.shard_id == shard)
    }

    /// Parses the textual form. The empty string is the empty token.
    pub fn parse(s: &str) -> Result<Self, TokenError> {
        let mut groups = s.split(GROUP_SEPARATOR);
        let rooms = parse_group(groups.next().unwrap_or_default())?;
        let users = parse_group(groups.next().unwrap_or_default())?;
        if groups.next().is_some() {
            return Err(TokenError::TooManyGroups);
        }
        Ok(Self { rooms, users })
    }

    /// Produces the textual form.
    ///
    /// # Errors
    ///
    /// Fails if a shard id or index does not fit its field, or if a shard id
    /// containing the digit `_` would follow a tuple separator.
    pub fn encode(&self) -> Result<String, TokenError> {
        let mut out = String::new();
        encode_group(&self.rooms, &mut out)?;
        if !self.users.is_empty() {
            out.push(GROUP_SEPARATOR);
            encode_group(&self.users, &mut out)?;
        }
        Ok(out)
    }
}

impl FromStr for StreamToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_group(s: &str) -> Result<Vec<ShardTuple>, TokenError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let chunks: Vec<&str> = s.split(VALUE_SEPARATOR).collect();
    if chunks.len() < 3 || chunks.len() % 2 == 0 {
        return Err(TokenError::InvalidTuple(s.to_string()));
    }

    let count = (chunks.len() - 1) / 2;
    let mut tuples = Vec::with_capacity(count);
    let mut shard = chunks[0];
    for n in 0..count {
        let event = chunks[2 * n + 1];
        let tail = chunks[2 * n + 2];
        let (signal, next_shard) = if n + 1 == count {
            (tail, None)
        } else {
            match tail.rfind(TUPLE_SEPARATOR) {
                Some(pos) => (&tail[..pos], Some(&tail[pos + 1..])),
                None => return Err(TokenError::InvalidTuple(s.to_string())),
            }
        };
        tuples.push(ShardTuple {
            shard_id: parse_shard_id(shard)?,
            event_index: parse_index(event)?,
            signal_index: parse_index(signal)?,
        });
        if let Some(next) = next_shard {
            shard = next;
        }
    }
    Ok(tuples)
}

fn parse_shard_id(s: &str) -> Result<ShardId, TokenError> {
    if s.is_empty() || s.len() > MAX_SHARD_ID_LEN {
        return Err(TokenError::ShardIdLength(s.len()));
    }
    // Two base-64 digits never exceed u32.
    Ok(ShardId(parse_value(s)? as u32))
}

fn parse_index(s: &str) -> Result<u64, TokenError> {
    if s.is_empty() || s.len() > MAX_INDEX_LEN {
        return Err(TokenError::IndexLength(s.len()));
    }
    parse_value(s)
}

/// Decodes a base-64 value. Length must be validated by the caller.
fn parse_value(s: &str) -> Result<u64, TokenError> {
    let mut value = 0u64;
    for (position, character) in s.chars().enumerate() {
        let digit = match character {
            'A'..='Z' => character as u64 - 'A' as u64,
            'a'..='z' => character as u64 - 'a' as u64 + 26,
            '0'..='9' => character as u64 - '0' as u64 + 52,
            '-' => 62,
            '_' => 63,
            _ => {
                return Err(TokenError::InvalidCharacter {
                    character,
                    position,
                })
            }
        };
        value = value * 64 + digit;
    }
    Ok(value)
}

fn encode_value(mut value: u64) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(ALPHABET[(value % 64) as usize]);
        value /= 64;
        if value == 0 {
            break;
        }
    }
    digits.iter().rev().map(|&b| b as char).collect()
}

fn encode_group(tuples: &[ShardTuple], out: &mut String) -> Result<(), TokenError> {
    for (n, tuple) in tuples.iter().enumerate() {
        let shard = encode_value(u64::from(tuple.shard_id.0));
        if shard.len() > MAX_SHARD_ID_LEN || (n > 0 && shard.contains(TUPLE_SEPARATOR)) {
            return Err(TokenError::UnencodableShard(tuple.shard_id.0));
        }
        let event = encode_value(tuple.event_index);
        if event.len() > MAX_INDEX_LEN {
            return Err(TokenError::IndexOverflow(tuple.event_index));
        }
        let signal = encode_value(tuple.signal_index);
        if signal.len() > MAX_INDEX_LEN {
            return Err(TokenError::IndexOverflow(tuple.signal_index));
        }
        if n > 0 {
            out.push(TUPLE_SEPARATOR);
        }
        out.push_str(&shard);
        out.push(VALUE_SEPARATOR);
        out.push_str(&event);
        out.push(VALUE_SEPARATOR);
        out.push_str(&signal);
    }
    Ok(())
}
