//! Type-safe identifiers for connections and resolved identities.
//!
//! Two kinds of connection identifier exist:
//!
//! - [`ConnectionKey`] is minted locally and synchronously when the
//!   transport is accepted. It keys every in-process index (dispatcher,
//!   permission tracker) so a connection can be tracked before anything
//!   else is known about it.
//! - [`ConnectionId`] is the process-unique id delivered asynchronously by
//!   the external allocator. It is the key under which the connection is
//!   replicated and enumerated.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Local handle key of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(u64);

impl ConnectionKey {
    /// Mints a fresh key, unique within this process.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Process-unique id assigned by the allocator, exactly once per
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw allocated value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw allocated value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Resolved identity of a connection.
///
/// On the wire a guest is `0` and an unresolved (or declined) identity is
/// `-1`; any other value is a user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    /// Identification has not completed, or was declined.
    #[default]
    Unresolved,
    /// Anonymous connection.
    Guest,
    /// Authenticated user.
    User(u64),
}

impl Identity {
    /// Maps a looked-up user id to an identity; `0` is a guest.
    #[must_use]
    pub const fn from_lookup(user_id: u64) -> Self {
        if user_id == 0 {
            Self::Guest
        } else {
            Self::User(user_id)
        }
    }

    /// Returns `true` once identification completed.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Returns `true` for guest connections.
    #[must_use]
    pub const fn is_guest(self) -> bool {
        matches!(self, Self::Guest)
    }

    /// Numeric user id as replicated to the metadata store; `None` while
    /// unresolved.
    #[must_use]
    pub const fn user_id(self) -> Option<u64> {
        match self {
            Self::Unresolved => None,
            Self::Guest => Some(0),
            Self::User(id) => Some(id),
        }
    }
}

impl Identity {
    /// Signed wire value: `-1` unresolved, `0` guest, otherwise the user id.
    #[must_use]
    pub fn wire_value(self) -> i64 {
        match self {
            Self::Unresolved => -1,
            Self::Guest => 0,
            Self::User(id) => i64::try_from(id).unwrap_or(i64::MAX),
        }
    }

    /// Inverse of [`Identity::wire_value`]; any negative value is unresolved.
    #[must_use]
    pub fn from_wire(value: i64) -> Self {
        u64::try_from(value).map_or(Self::Unresolved, Self::from_lookup)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.wire_value())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::from_wire)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => f.write_str("-1"),
            Self::Guest => f.write_str("0"),
            Self::User(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        let a = ConnectionKey::next();
        let b = ConnectionKey::next();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_wire_format() {
        assert_eq!(Identity::Unresolved.to_string(), "-1");
        assert_eq!(Identity::Guest.to_string(), "0");
        assert_eq!(Identity::User(42).to_string(), "42");
    }

    #[test]
    fn zero_lookup_is_guest() {
        assert_eq!(Identity::from_lookup(0), Identity::Guest);
        assert_eq!(Identity::from_lookup(7), Identity::User(7));
    }

    #[test]
    fn user_id_is_none_until_resolved() {
        assert_eq!(Identity::Unresolved.user_id(), None);
        assert_eq!(Identity::Guest.user_id(), Some(0));
        assert!(!Identity::Unresolved.is_resolved());
        assert!(Identity::Guest.is_guest());
    }

    #[test]
    fn identity_serializes_as_signed_number() {
        let json = serde_json::to_string(&[Identity::Unresolved, Identity::Guest, Identity::User(9)])
            .unwrap_or_default();
        assert_eq!(json, "[-1,0,9]");
        let back: Vec<Identity> = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(back, vec![Identity::Unresolved, Identity::Guest, Identity::User(9)]);
    }

    #[test]
    fn connection_id_serializes_as_number() {
        let json = serde_json::to_string(&ConnectionId::new(17)).unwrap_or_default();
        assert_eq!(json, "17");
    }
}
