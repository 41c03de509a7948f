//! Room registry for the relay server.
//!
//! Maintains the in-memory directory of rooms and the connections in each.
//! The registry is a plain data structure with an explicit
//! create/lookup/delete contract; [`crate::relay::RelayState`] owns it
//! behind a single mutex so every mutation and every fan-out happens as one
//! step.
//!
//! Invariants:
//! - a connection is a member of at most one room;
//! - members keep their join order;
//! - an emptied room is deleted, but the default room always exists.
//!
//! Room entries are ephemeral, lost on relay restart.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use pairline_proto::identity::{PeerId, RoomName};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A JSON text frame.
    Text(Utf8Bytes),
}

/// Sender half of a connection's outbound queue.
pub type PeerSender = mpsc::UnboundedSender<Outbound>;

/// One connection as seen by the registry.
#[derive(Debug)]
pub struct Member {
    id: PeerId,
    sender: PeerSender,
    kill: Option<oneshot::Sender<()>>,
    last_pong: Instant,
}

impl Member {
    /// Create a member whose liveness clock starts at `now`.
    #[must_use]
    pub const fn new(
        id: PeerId,
        sender: PeerSender,
        kill: oneshot::Sender<()>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            sender,
            kill: Some(kill),
            last_pong: now,
        }
    }

    /// The connection identifier.
    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    /// Instant of the last heartbeat acknowledgement (or of admission).
    #[must_use]
    pub const fn last_pong(&self) -> Instant {
        self.last_pong
    }

    /// Queue a text frame. Returns `false` if the writer task is gone.
    pub fn send(&self, text: &Utf8Bytes) -> bool {
        self.sender.send(Outbound::Text(text.clone())).is_ok()
    }

    /// Force the connection task to drop its transport.
    pub fn terminate(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// A named group of connections.
#[derive(Debug, Default)]
pub struct Room {
    members: Vec<Member>,
}

impl Room {
    /// Number of connections in the room.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member identifiers in join order.
    #[must_use]
    pub fn ids(&self) -> Vec<PeerId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    /// Iterate over the members in join order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }
}

/// Directory of rooms keyed by name.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<RoomName, Room>,
    membership: HashMap<PeerId, RoomName>,
    default_room: RoomName,
}

impl RoomRegistry {
    /// Create a registry holding only the (empty) default room.
    #[must_use]
    pub fn new(default_room: RoomName) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(default_room.clone(), Room::default());
        Self {
            rooms,
            membership: HashMap::new(),
            default_room,
        }
    }

    /// Name of the room every new connection starts in.
    #[must_use]
    pub const fn default_room(&self) -> &RoomName {
        &self.default_room
    }

    /// Return the named room, creating it if absent.
    pub fn create(&mut self, name: &RoomName) -> &mut Room {
        self.rooms.entry(name.clone()).or_default()
    }

    /// Return the named room, if it exists.
    #[must_use]
    pub fn lookup(&self, name: &RoomName) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Delete a room and forget its members' membership.
    ///
    /// Deleting the default room leaves an empty default room in its place.
    pub fn delete(&mut self, name: &RoomName) -> Option<Room> {
        let removed = self.rooms.remove(name);
        if let Some(room) = &removed {
            for member in &room.members {
                self.membership.remove(&member.id);
            }
        }
        self.ensure_default();
        removed
    }

    /// The room a connection currently belongs to.
    #[must_use]
    pub fn room_of(&self, id: &PeerId) -> Option<&RoomName> {
        self.membership.get(id)
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// A connection already in another room is moved; its old membership
    /// entry is returned so the caller can notify that room.
    pub fn add(&mut self, room: &RoomName, member: Member) -> Option<(RoomName, Member)> {
        let previous = self.remove(&member.id);
        self.membership.insert(member.id.clone(), room.clone());
        self.create(room).members.push(member);
        previous
    }

    /// Remove a connection from its room.
    ///
    /// Returns the room it left and the member entry. A room left empty is
    /// deleted (the default room is recreated).
    pub fn remove(&mut self, id: &PeerId) -> Option<(RoomName, Member)> {
        let room_name = self.membership.remove(id)?;
        let room = self.rooms.get_mut(&room_name)?;
        let pos = room.members.iter().position(|m| &m.id == id)?;
        let member = room.members.remove(pos);
        if room.is_empty() {
            self.delete(&room_name);
        }
        Some((room_name, member))
    }

    /// Record a heartbeat acknowledgement. Returns `false` for unknown ids.
    pub fn touch(&mut self, id: &PeerId, now: Instant) -> bool {
        let Some(room_name) = self.membership.get(id) else {
            return false;
        };
        let Some(member) = self
            .rooms
            .get_mut(room_name)
            .and_then(|room| room.members.iter_mut().find(|m| &m.id == id))
        else {
            return false;
        };
        member.last_pong = now;
        true
    }

    /// Connections whose last acknowledgement is older than `timeout`.
    #[must_use]
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.rooms
            .values()
            .flat_map(Room::members)
            .filter(|m| now.saturating_duration_since(m.last_pong) > timeout)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Iterate over every room.
    pub fn rooms(&self) -> impl Iterator<Item = (&RoomName, &Room)> {
        self.rooms.iter()
    }

    /// Total number of connections across all rooms.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.membership.len()
    }

    fn ensure_default(&mut self) {
        self.rooms.entry(self.default_room.clone()).or_default();
    }
}
