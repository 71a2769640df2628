//! 128-bit sortable identifiers
//!
//! Every entity in skewer (session, connection, configuration, message) is
//! identified by a ULID. The zero value is reserved to mean "absent".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 128-bit identifier, lexicographically sortable by creation time.
///
/// Serialized as the canonical 26-character Crockford base32 string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Uid(ulid::Ulid);

impl Uid {
    /// The reserved "absent" identifier.
    pub const ZERO: Uid = Uid(ulid::Ulid::nil());

    /// Generate a fresh identifier from the system clock and entropy.
    pub fn new() -> Self {
        Uid(ulid::Ulid::new())
    }

    /// True if this is the reserved zero value.
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }

    /// The big-endian byte representation, usable as an ordered store key.
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Rebuild an identifier from its byte representation.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Uid(ulid::Ulid::from_bytes(bytes))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Uid {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Uid(ulid::Ulid::from_str(s)?))
    }
}

/// Monotonic identifier generator.
///
/// Within one generator, identifiers produced in the same millisecond are
/// still strictly increasing, so store keys never collide or reorder.
pub struct Generator {
    inner: ulid::Generator,
}

impl Default for Generator {
    fn default() -> Self {
        Generator {
            inner: ulid::Generator::new(),
        }
    }
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier. Falls back to a fresh random ULID in the (practically
    /// unreachable) case where the monotonic counter overflows within one
    /// millisecond.
    pub fn uid(&mut self) -> Uid {
        match self.inner.generate() {
            Ok(u) => Uid(u),
            Err(_) => Uid::new(),
        }
    }
}

#[cfg(test)]
#[path = "uid_test.rs"]
mod uid_test;
