//! `Pairline` client: signaling channel, room presence and offer/answer
//! negotiation for one two-party call.

pub mod config;
pub mod negotiation;
pub mod presence;
pub mod session;
pub mod signaling;
