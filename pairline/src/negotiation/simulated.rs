//! In-process peer connection that models offer/answer signaling.
//!
//! [`SimulatedPeer`] follows the signaling-state rules of a browser peer
//! connection closely enough to exercise the negotiation coordinator end to
//! end: answers are accepted only while an offer is outstanding, a remote
//! offer is refused while a local one is pending (unless rolled back), and
//! candidates must belong to the remote description they are added to. It
//! emits real-looking SDP with random ICE credentials but carries no media.

use pairline_proto::envelope::{IceCandidate, SdpKind, SessionDescription};
use rand::Rng;
use rand::distr::Alphanumeric;

use super::peer::{LocalTrack, MediaKind, PeerConnection, PeerError, SignalingState};

/// Media direction attribute of one m-section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }

    fn parse(attr: &str) -> Option<Self> {
        match attr {
            "sendrecv" => Some(Self::SendRecv),
            "sendonly" => Some(Self::SendOnly),
            "recvonly" => Some(Self::RecvOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    const fn sends(self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    const fn receives(self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }

    /// Our direction when answering a section offered as `offered`.
    const fn answering(offered: Self, have_track: bool) -> Self {
        match (have_track && offered.receives(), offered.sends()) {
            (true, true) => Self::SendRecv,
            (true, false) => Self::SendOnly,
            (false, true) => Self::RecvOnly,
            (false, false) => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone)]
struct MediaSection {
    kind: MediaKind,
    direction: Direction,
    track_id: Option<String>,
}

/// The parts of a remote description the model cares about.
#[derive(Debug, Clone)]
struct RemoteDescription {
    ice_ufrag: String,
    sections: Vec<(MediaKind, Direction)>,
}

impl RemoteDescription {
    fn parse(description: &SessionDescription) -> Result<Self, PeerError> {
        let mut lines = description.sdp.lines();
        if lines.next() != Some("v=0") {
            return Err(PeerError::MalformedDescription(
                "missing version line".to_string(),
            ));
        }

        let mut ice_ufrag = None;
        let mut sections: Vec<(MediaKind, Direction)> = Vec::new();
        for line in lines {
            if let Some(ufrag) = line.strip_prefix("a=ice-ufrag:") {
                ice_ufrag.get_or_insert_with(|| ufrag.to_string());
            } else if let Some(media) = line.strip_prefix("m=") {
                let kind = match media.split_whitespace().next() {
                    Some("audio") => MediaKind::Audio,
                    Some("video") => MediaKind::Video,
                    _ => {
                        return Err(PeerError::MalformedDescription(format!(
                            "unsupported media line {line:?}"
                        )));
                    }
                };
                sections.push((kind, Direction::SendRecv));
            } else if let Some(direction) = line.strip_prefix("a=").and_then(Direction::parse)
                && let Some(last) = sections.last_mut()
            {
                last.1 = direction;
            }
        }

        let ice_ufrag = ice_ufrag.ok_or_else(|| {
            PeerError::MalformedDescription("missing ice-ufrag attribute".to_string())
        })?;
        Ok(Self {
            ice_ufrag,
            sections,
        })
    }
}

/// Signaling-only peer connection.
#[derive(Debug)]
pub struct SimulatedPeer {
    state: SignalingState,
    tracks: Vec<LocalTrack>,
    placeholders: Vec<MediaKind>,
    ice_ufrag: String,
    ice_pwd: String,
    session_id: u64,
    version: u64,
    local_description: Option<SessionDescription>,
    current_remote: Option<RemoteDescription>,
    pending_remote: Option<RemoteDescription>,
    remote_candidates: Vec<IceCandidate>,
    local_candidates: Vec<IceCandidate>,
    gathered: bool,
}

impl Default for SimulatedPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPeer {
    /// Create a peer in the stable state with fresh ICE credentials.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self {
            state: SignalingState::Stable,
            tracks: Vec::new(),
            placeholders: Vec::new(),
            ice_ufrag: random_token(8),
            ice_pwd: random_token(24),
            session_id: rng.random_range(1..u64::from(u32::MAX)),
            version: 0,
            local_description: None,
            current_remote: None,
            pending_remote: None,
            remote_candidates: Vec::new(),
            local_candidates: Vec::new(),
            gathered: false,
        }
    }

    /// ICE username fragment advertised in local descriptions.
    #[must_use]
    pub fn ice_ufrag(&self) -> &str {
        &self.ice_ufrag
    }

    /// The most recently applied local description.
    #[must_use]
    pub const fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Remote candidates accepted so far.
    #[must_use]
    pub fn remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidates
    }

    /// Receive-only slots added by [`PeerConnection::ensure_receive_placeholders`].
    #[must_use]
    pub fn placeholders(&self) -> &[MediaKind] {
        &self.placeholders
    }

    /// Attached local tracks.
    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Media kinds the remote side sends according to the committed remote
    /// description.
    #[must_use]
    pub fn remote_sending(&self) -> Vec<MediaKind> {
        self.current_remote
            .as_ref()
            .map(|remote| {
                remote
                    .sections
                    .iter()
                    .filter(|(_, d)| d.sends())
                    .map(|(k, _)| *k)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn active_remote(&self) -> Option<&RemoteDescription> {
        self.pending_remote.as_ref().or(self.current_remote.as_ref())
    }

    fn offer_sections(&self) -> Vec<MediaSection> {
        let sending = self.tracks.iter().map(|t| MediaSection {
            kind: t.kind,
            direction: Direction::SendRecv,
            track_id: Some(t.id.clone()),
        });
        let receiving = self
            .placeholders
            .iter()
            .filter(|kind| !self.tracks.iter().any(|t| t.kind == **kind))
            .map(|kind| MediaSection {
                kind: *kind,
                direction: Direction::RecvOnly,
                track_id: None,
            });
        sending.chain(receiving).collect()
    }

    fn answer_sections(&self, offer: &RemoteDescription) -> Vec<MediaSection> {
        let mut unused: Vec<&LocalTrack> = self.tracks.iter().collect();
        offer
            .sections
            .iter()
            .map(|(kind, offered)| {
                let track = unused
                    .iter()
                    .position(|t| t.kind == *kind && offered.receives())
                    .map(|i| unused.remove(i));
                MediaSection {
                    kind: *kind,
                    direction: Direction::answering(*offered, track.is_some()),
                    track_id: track.map(|t| t.id.clone()),
                }
            })
            .collect()
    }

    fn render(&self, sections: &[MediaSection]) -> String {
        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- {} {} IN IP4 127.0.0.1", self.session_id, self.version),
            "s=-".to_string(),
            "t=0 0".to_string(),
        ];
        if !sections.is_empty() {
            let mids: Vec<String> = (0..sections.len()).map(|i| i.to_string()).collect();
            lines.push(format!("a=group:BUNDLE {}", mids.join(" ")));
        }
        lines.push(format!("a=ice-ufrag:{}", self.ice_ufrag));
        lines.push(format!("a=ice-pwd:{}", self.ice_pwd));
        for (mid, section) in sections.iter().enumerate() {
            let payload_type = match section.kind {
                MediaKind::Audio => 111,
                MediaKind::Video => 96,
            };
            lines.push(format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {payload_type}",
                section.kind
            ));
            lines.push("c=IN IP4 0.0.0.0".to_string());
            lines.push(format!("a=mid:{mid}"));
            lines.push(format!("a={}", section.direction.as_str()));
            if let Some(track_id) = &section.track_id {
                lines.push(format!("a=msid:pairline {track_id}"));
            }
        }
        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        sdp
    }

    /// Queue one host candidate the first time a description with media is
    /// applied.
    fn gather(&mut self, section_count: usize) {
        if self.gathered || section_count == 0 {
            return;
        }
        self.gathered = true;
        let port: u16 = rand::rng().random_range(49152..=65535);
        self.local_candidates.push(IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 127.0.0.1 {port} typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: Some(self.ice_ufrag.clone()),
        });
    }

    fn apply_local(&mut self) -> SessionDescription {
        self.version += 1;
        let (description, sections) = if let Some(offer) = self
            .pending_remote
            .take()
            .filter(|_| self.state == SignalingState::HaveRemoteOffer)
        {
            let sections = self.answer_sections(&offer);
            self.current_remote = Some(offer);
            self.state = SignalingState::Stable;
            (SessionDescription::answer(self.render(&sections)), sections)
        } else {
            let sections = self.offer_sections();
            self.state = SignalingState::HaveLocalOffer;
            (SessionDescription::offer(self.render(&sections)), sections)
        };
        self.gather(sections.len());
        self.local_description = Some(description.clone());
        description
    }

    fn apply_remote(&mut self, description: &SessionDescription) -> Result<(), PeerError> {
        let parsed = RemoteDescription::parse(description)?;
        match (description.kind, self.state) {
            (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                self.pending_remote = Some(parsed);
                self.state = SignalingState::HaveRemoteOffer;
                Ok(())
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                self.current_remote = Some(parsed);
                self.state = SignalingState::Stable;
                Ok(())
            }
            (SdpKind::Offer, state) => Err(PeerError::InvalidState {
                operation: "apply remote offer",
                state,
            }),
            (SdpKind::Answer, state) => Err(PeerError::InvalidState {
                operation: "apply remote answer",
                state,
            }),
            (kind, _) => Err(PeerError::MalformedDescription(format!(
                "unsupported remote description type {kind:?}"
            ))),
        }
    }

    fn apply_rollback(&mut self) -> Result<(), PeerError> {
        match self.state {
            SignalingState::Stable => Err(PeerError::InvalidState {
                operation: "rollback",
                state: SignalingState::Stable,
            }),
            SignalingState::HaveLocalOffer => {
                self.state = SignalingState::Stable;
                Ok(())
            }
            SignalingState::HaveRemoteOffer => {
                self.pending_remote = None;
                self.state = SignalingState::Stable;
                Ok(())
            }
        }
    }

    fn apply_candidate(&mut self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let remote = self.active_remote().ok_or(PeerError::NoRemoteDescription)?;
        if candidate.candidate.is_empty() {
            // End-of-candidates marker.
            return Ok(());
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(PeerError::CandidateRejected(format!(
                "not a candidate attribute: {:?}",
                candidate.candidate
            )));
        }
        if let Some(ufrag) = &candidate.username_fragment
            && ufrag != &remote.ice_ufrag
        {
            return Err(PeerError::CandidateRejected(format!(
                "unknown username fragment {ufrag}"
            )));
        }
        if let Some(index) = candidate.sdp_m_line_index
            && usize::from(index) >= remote.sections.len()
        {
            return Err(PeerError::CandidateRejected(format!(
                "m-line index {index} out of range"
            )));
        }
        self.remote_candidates.push(candidate.clone());
        Ok(())
    }
}

impl PeerConnection for SimulatedPeer {
    fn signaling_state(&self) -> SignalingState {
        self.state
    }

    async fn set_local_description(&mut self) -> Result<SessionDescription, PeerError> {
        Ok(self.apply_local())
    }

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        self.apply_remote(description)
    }

    async fn rollback_and_set_remote(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        if description.kind != SdpKind::Offer {
            return Err(PeerError::MalformedDescription(
                "only an offer can replace a rolled-back description".to_string(),
            ));
        }
        // Validate before touching state so a bad offer leaves us unchanged.
        RemoteDescription::parse(description)?;
        if !self.state.is_stable() {
            self.apply_rollback()?;
        }
        self.apply_remote(description)
    }

    async fn rollback(&mut self) -> Result<(), PeerError> {
        self.apply_rollback()
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.apply_candidate(candidate)
    }

    fn add_track(&mut self, track: LocalTrack) -> Result<(), PeerError> {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return Err(PeerError::DuplicateTrack(track.id));
        }
        self.tracks.push(track);
        Ok(())
    }

    fn remove_track(&mut self, track_id: &str) -> Result<LocalTrack, PeerError> {
        let pos = self
            .tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| PeerError::UnknownTrack(track_id.to_string()))?;
        Ok(self.tracks.remove(pos))
    }

    fn has_local_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    fn ensure_receive_placeholders(&mut self) -> Vec<MediaKind> {
        let mut added = Vec::new();
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let covered = self.placeholders.contains(&kind)
                || self.tracks.iter().any(|t| t.kind == kind);
            if !covered {
                self.placeholders.push(kind);
                added.push(kind);
            }
        }
        added
    }

    fn take_local_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.local_candidates)
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
