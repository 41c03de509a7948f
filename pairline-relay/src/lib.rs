//! Pairline signaling relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, groups them into rooms, and forwards
//! negotiation messages between the members of a room.

pub mod config;
pub mod heartbeat;
pub mod relay;
pub mod rooms;
