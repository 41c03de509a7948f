//! Room presence as seen from one client.
//!
//! Tracks the local identifier from `welcome`, the room size from `peers`,
//! and derives the single remote identifier negotiation targets.

use pairline_proto::identity::{PeerId, Role};

/// What a presence update changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceChange {
    /// The online flag flipped.
    pub online: bool,
    /// The remote identifier changed (appeared, disappeared or was replaced).
    pub remote: bool,
}

impl PresenceChange {
    /// Whether nothing changed.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.online && !self.remote
    }
}

/// Local view of the room membership.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    local: Option<PeerId>,
    remote: Option<PeerId>,
    count: usize,
    ids: Vec<PeerId>,
}

impl PresenceTracker {
    /// Start with nothing known.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Our identifier, once welcomed.
    #[must_use]
    pub const fn local_id(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    /// The remote endpoint negotiation targets.
    #[must_use]
    pub const fn remote_id(&self) -> Option<&PeerId> {
        self.remote.as_ref()
    }

    /// Last reported room size.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Whether anyone else is in the room.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.count > 1
    }

    /// Our role towards the tracked remote endpoint.
    #[must_use]
    pub fn role(&self) -> Role {
        Role::between(self.local.as_ref(), self.remote.as_ref())
    }

    /// Record the identifier assigned by the relay.
    pub fn on_welcome(&mut self, id: PeerId) -> PresenceChange {
        tracing::info!(peer_id = %id, "assigned identity");
        self.local = Some(id);
        self.update(self.count)
    }

    /// Apply a membership broadcast.
    pub fn on_peers(&mut self, count: usize, ids: Vec<PeerId>) -> PresenceChange {
        if count > 2 {
            tracing::warn!(count, "room holds more than two members, pairing with the first");
        }
        self.ids = ids;
        self.update(count)
    }

    /// Forget everything after the channel closed.
    pub fn reset(&mut self) -> PresenceChange {
        self.local = None;
        self.ids.clear();
        self.update(0)
    }

    fn update(&mut self, count: usize) -> PresenceChange {
        let was_online = self.is_online();
        self.count = count;

        // Without our own id we cannot tell which entry is us.
        let remote = self.local.as_ref().and_then(|local| {
            self.ids.iter().find(|id| *id != local).cloned()
        });
        let remote_changed = remote != self.remote;
        self.remote = remote;

        PresenceChange {
            online: was_online != self.is_online(),
            remote: remote_changed,
        }
    }
}
