//! Shared protocol definitions for the `Pairline` signaling wire format.

pub mod codec;
pub mod envelope;
pub mod identity;
