//! Peer-connection abstraction used by the negotiation coordinator.
//!
//! Mirrors the slice of a browser `RTCPeerConnection` that offer/answer
//! negotiation touches. [`super::simulated::SimulatedPeer`] is the in-process
//! implementation; a media-capable backend plugs in through the same trait.

use std::fmt;
use std::future::Future;

use pairline_proto::envelope::{IceCandidate, SessionDescription};

/// Offer/answer signaling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    /// No exchange in progress.
    #[default]
    Stable,
    /// A local offer awaits the remote answer.
    HaveLocalOffer,
    /// A remote offer awaits the local answer.
    HaveRemoteOffer,
}

impl SignalingState {
    /// Whether no exchange is in progress.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stable)
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::HaveLocalOffer => write!(f, "have-local-offer"),
            Self::HaveRemoteOffer => write!(f, "have-remote-offer"),
        }
    }
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio.
    Audio,
    /// Video.
    Video,
}

impl MediaKind {
    /// The SDP media type token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a local track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    /// Microphone capture.
    Microphone,
    /// Screen or window capture (video and optional system audio).
    Screen,
}

/// A local media track attached to the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Track identifier, unique within one peer connection.
    pub id: String,
    /// Audio or video.
    pub kind: MediaKind,
    /// Capture source.
    pub source: TrackSource,
}

impl LocalTrack {
    /// Microphone audio track.
    #[must_use]
    pub fn microphone() -> Self {
        Self {
            id: "mic".to_string(),
            kind: MediaKind::Audio,
            source: TrackSource::Microphone,
        }
    }

    /// Screen video track.
    #[must_use]
    pub fn screen_video() -> Self {
        Self {
            id: "screen-video".to_string(),
            kind: MediaKind::Video,
            source: TrackSource::Screen,
        }
    }

    /// Screen system-audio track.
    #[must_use]
    pub fn screen_audio() -> Self {
        Self {
            id: "screen-audio".to_string(),
            kind: MediaKind::Audio,
            source: TrackSource::Screen,
        }
    }
}

/// Errors reported by a peer-connection object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// The operation is not allowed in the current signaling state.
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// The state at the time.
        state: SignalingState,
    },

    /// The session description could not be parsed.
    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    /// A candidate arrived before any remote description.
    #[error("no remote description to add the candidate to")]
    NoRemoteDescription,

    /// A candidate does not belong to the current remote description.
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    /// A track with this id is already attached.
    #[error("track {0} is already attached")]
    DuplicateTrack(String),

    /// No track with this id is attached.
    #[error("no track {0}")]
    UnknownTrack(String),
}

/// Negotiation-facing operations of a peer connection.
///
/// Description and candidate operations are asynchronous, as they are on a
/// real media stack. Track bookkeeping is synchronous. Implementations are
/// shared by reference across await points inside the session task, hence
/// `Sync`.
pub trait PeerConnection: Send + Sync {
    /// Current signaling state.
    fn signaling_state(&self) -> SignalingState;

    /// Create and apply a local description: an offer when stable or
    /// already offering, an answer when holding a remote offer.
    fn set_local_description(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, PeerError>> + Send;

    /// Apply a remote offer or answer.
    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Discard the pending local offer and apply a remote offer as one
    /// transition. On failure the connection is left unchanged.
    fn rollback_and_set_remote(
        &mut self,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Return to stable by discarding the pending description.
    fn rollback(&mut self) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Add a remote network candidate.
    fn add_ice_candidate(
        &mut self,
        candidate: &IceCandidate,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Attach a local track.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::DuplicateTrack`] if the id is already attached.
    fn add_track(&mut self, track: LocalTrack) -> Result<(), PeerError>;

    /// Detach a local track by id.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::UnknownTrack`] if no such track is attached.
    fn remove_track(&mut self, track_id: &str) -> Result<LocalTrack, PeerError>;

    /// Whether any local track is attached.
    fn has_local_tracks(&self) -> bool;

    /// Make sure receive-only slots exist for audio and video so the remote
    /// side can send both. Returns the kinds that were added.
    fn ensure_receive_placeholders(&mut self) -> Vec<MediaKind>;

    /// Drain local candidates gathered since the last call.
    fn take_local_candidates(&mut self) -> Vec<IceCandidate>;
}
