//! Signaling envelope types.
//!
//! Every message on the wire is a flat JSON object carrying a `type` tag,
//! optional routing metadata (`room`, `senderId`, `from`) and the fields of
//! its payload. [`Signal`] is the closed set of payloads; [`Envelope`] pairs
//! a payload with its metadata. Encoding and decoding live in
//! [`crate::codec`].

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, RoomName};

/// Message type tag, as carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Client asks to be placed in a room.
    Join,
    /// Server confirms the connection's identifier and room.
    Welcome,
    /// Server broadcasts the room membership.
    Peers,
    /// Server liveness probe.
    Ping,
    /// Client liveness reply.
    Pong,
    /// Session description offer (relayed).
    Offer,
    /// Session description answer (relayed).
    Answer,
    /// Network candidate (relayed).
    Ice,
    /// Screen status or offer request (relayed).
    State,
}

impl SignalKind {
    /// All kinds, in wire-table order.
    pub const ALL: [Self; 9] = [
        Self::Join,
        Self::Welcome,
        Self::Peers,
        Self::Ping,
        Self::Pong,
        Self::Offer,
        Self::Answer,
        Self::Ice,
        Self::State,
    ];

    /// The wire spelling of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Welcome => "welcome",
            Self::Peers => "peers",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Ice => "ice",
            Self::State => "state",
        }
    }

    /// Whether the relay forwards this kind to the other room members.
    #[must_use]
    pub const fn is_relayed(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Ice | Self::State)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// An offer.
    Offer,
    /// A provisional answer.
    Pranswer,
    /// A final answer.
    Answer,
    /// A rollback marker (never sent by this implementation).
    Rollback,
}

/// A session description, shaped like a browser `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Opaque SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network candidate, shaped like a browser `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The `candidate:` attribute line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment of the description this candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Local screen-share status announced to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenState {
    /// The sender started sharing its screen.
    On,
    /// The sender stopped sharing its screen.
    Off,
}

/// Special-purpose `state` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSubtype {
    /// Impolite endpoint asks the polite one to originate an offer.
    #[serde(rename = "request-offer", alias = "please_offer")]
    RequestOffer,
}

/// Payload of a `state` message: a screen status, an offer request, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Screen status, if this update announces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenState>,
    /// Special-purpose subtype, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<StateSubtype>,
}

impl StateUpdate {
    /// A screen status update.
    #[must_use]
    pub const fn screen(state: ScreenState) -> Self {
        Self {
            screen: Some(state),
            subtype: None,
        }
    }

    /// An offer request.
    #[must_use]
    pub const fn request_offer() -> Self {
        Self {
            screen: None,
            subtype: Some(StateSubtype::RequestOffer),
        }
    }

    /// Whether this update asks the receiver to originate an offer.
    #[must_use]
    pub fn is_offer_request(&self) -> bool {
        self.subtype == Some(StateSubtype::RequestOffer)
    }
}

/// The closed set of signaling payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Join the room named in the envelope.
    Join {},
    /// Identifier assigned to the receiving connection.
    Welcome {
        /// The connection's identifier.
        id: PeerId,
    },
    /// Current membership of the envelope's room.
    Peers {
        /// Number of connections in the room.
        count: usize,
        /// Their identifiers, in join order.
        ids: Vec<PeerId>,
    },
    /// Liveness probe.
    Ping {
        /// Milliseconds since the Unix epoch when the probe was sent.
        ts: u64,
    },
    /// Liveness reply.
    Pong {
        /// Echo of the probe timestamp.
        ts: u64,
    },
    /// Offer description.
    Offer {
        /// The offered description.
        sdp: SessionDescription,
    },
    /// Answer description.
    Answer {
        /// The answering description.
        sdp: SessionDescription,
    },
    /// Remote network candidate.
    Ice {
        /// The candidate.
        candidate: IceCandidate,
    },
    /// Screen status or offer request.
    State(StateUpdate),
}

impl Signal {
    /// The type tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Join {} => SignalKind::Join,
            Self::Welcome { .. } => SignalKind::Welcome,
            Self::Peers { .. } => SignalKind::Peers,
            Self::Ping { .. } => SignalKind::Ping,
            Self::Pong { .. } => SignalKind::Pong,
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::Ice { .. } => SignalKind::Ice,
            Self::State(_) => SignalKind::State,
        }
    }
}

/// A payload together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The payload.
    pub signal: Signal,
    /// Room the message concerns.
    pub room: Option<RoomName>,
    /// Identifier stamped by the sending client, if it knew its own id.
    pub sender_id: Option<PeerId>,
    /// Identifier stamped by the relay when forwarding.
    pub from: Option<PeerId>,
}

impl Envelope {
    /// Wrap a payload with no metadata.
    #[must_use]
    pub const fn new(signal: Signal) -> Self {
        Self {
            signal,
            room: None,
            sender_id: None,
            from: None,
        }
    }

    /// Set the room.
    #[must_use]
    pub fn in_room(mut self, room: RoomName) -> Self {
        self.room = Some(room);
        self
    }

    /// Set the sender stamp.
    #[must_use]
    pub fn with_sender(mut self, sender_id: Option<PeerId>) -> Self {
        self.sender_id = sender_id;
        self
    }

    /// Set the relay stamp.
    #[must_use]
    pub fn with_from(mut self, from: PeerId) -> Self {
        self.from = Some(from);
        self
    }

    /// The best-known originator: the client stamp, else the relay stamp.
    #[must_use]
    pub fn originator(&self) -> Option<&PeerId> {
        self.sender_id.as_ref().or(self.from.as_ref())
    }

    /// The type tag of the payload.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        self.signal.kind()
    }
}

/// Milliseconds since the Unix epoch, as used in `ping`/`pong` timestamps.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
