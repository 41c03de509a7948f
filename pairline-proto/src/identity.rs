//! Participant and room identifiers, and the politeness rule derived from them.
//!
//! Identifiers are assigned by the relay (`c1`, `c2`, ...) and compared
//! byte-wise. The endpoint holding the strictly smaller identifier is the
//! polite one; the rule is recomputed from both ids on every use.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Room joined by clients that never ask for a specific one.
pub const DEFAULT_ROOM: &str = "room-1";

/// Identifier of one connection, as assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this peer ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a signaling room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    /// Create a room name from its string form.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the string representation of this room name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (such a room is never joined).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RoomName {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Negotiation role of the local endpoint relative to one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Smaller identifier: originates offers and rolls back on collision.
    Polite,
    /// Larger (or equal) identifier: never offers, discards colliding offers.
    Impolite,
}

impl Role {
    /// Derive the local role from both identifiers.
    ///
    /// An unknown identifier compares as the empty string, so an endpoint
    /// that has not been welcomed yet is polite towards any known peer.
    #[must_use]
    pub fn between(local: Option<&PeerId>, remote: Option<&PeerId>) -> Self {
        let local = local.map_or("", PeerId::as_str);
        let remote = remote.map_or("", PeerId::as_str);
        if local < remote {
            Self::Polite
        } else {
            Self::Impolite
        }
    }

    /// Whether this role is [`Role::Polite`].
    #[must_use]
    pub const fn is_polite(self) -> bool {
        matches!(self, Self::Polite)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polite => write!(f, "polite"),
            Self::Impolite => write!(f, "impolite"),
        }
    }
}
