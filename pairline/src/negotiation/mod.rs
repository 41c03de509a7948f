//! Offer/answer negotiation between the local peer connection and the one
//! remote endpoint.
//!
//! Only the polite endpoint (smaller identifier) ever originates an offer.
//! The impolite endpoint asks for one with `state{subtype:"request-offer"}`.
//! Collisions are resolved the perfect-negotiation way: the polite side
//! rolls back and accepts, the impolite side ignores the incoming offer and
//! suppresses candidate errors that belong to it.
//!
//! [`NegotiationCoordinator`] is owned by a single session task and every
//! method takes `&mut self`, so one negotiation step never interleaves with
//! another.

pub mod peer;
pub mod simulated;

use pairline_proto::envelope::{
    Envelope, IceCandidate, ScreenState, SessionDescription, Signal, StateUpdate,
};
use pairline_proto::identity::{PeerId, Role};
use tokio::sync::mpsc;

pub use peer::{LocalTrack, MediaKind, PeerConnection, PeerError, SignalingState, TrackSource};
pub use simulated::SimulatedPeer;

use crate::presence::PresenceTracker;

/// Errors from a negotiation step.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The peer-connection object refused an operation.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The outbound signaling queue is gone.
    #[error("signaling outbox closed")]
    OutboxClosed,
}

/// Per-session negotiation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationState {
    /// A local description is being produced.
    pub making_offer: bool,
    /// The last remote offer was discarded because of a collision.
    pub ignore_offer: bool,
    /// An offer round is owed once the remote side is known and stable.
    pub renegotiate_pending: bool,
}

/// Result of [`NegotiationCoordinator::create_offer_if_needed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// No remote endpoint is known.
    NoRemote,
    /// We are impolite and asked the remote side to offer.
    RequestedOffer,
    /// An offer is already being produced.
    SkippedInFlight,
    /// A remote offer is still unanswered; the round was postponed.
    Deferred,
    /// An offer was sent.
    Sent,
}

/// Result of [`NegotiationCoordinator::handle_offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferReply {
    /// The offer collided with ours and we are impolite: dropped.
    Ignored,
    /// The offer was applied and answered.
    Answered,
    /// The offer was applied but no answer was due.
    Applied,
}

/// Result of [`NegotiationCoordinator::handle_candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// The candidate was added.
    Added,
    /// The candidate was rejected while an ignored offer was outstanding.
    Suppressed,
}

/// Result of [`NegotiationCoordinator::handle_state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateOutcome {
    /// Remote screen status carried by the message, if any.
    pub screen: Option<ScreenState>,
    /// What an offer request led to, if the message carried one and we are
    /// the polite endpoint.
    pub offer: Option<OfferOutcome>,
}

/// Drives offer/answer exchange for one peer connection.
#[derive(Debug)]
pub struct NegotiationCoordinator<P> {
    peer: P,
    state: NegotiationState,
    /// Remote endpoint the current offer/answer round was started with.
    target: Option<PeerId>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl<P: PeerConnection> NegotiationCoordinator<P> {
    /// Wrap a peer connection. Outgoing signals go to `outbox`.
    pub fn new(peer: P, outbox: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            peer,
            state: NegotiationState::default(),
            target: None,
            outbox,
        }
    }

    /// The wrapped peer connection.
    pub const fn peer(&self) -> &P {
        &self.peer
    }

    /// Give back the peer connection.
    pub fn into_peer(self) -> P {
        self.peer
    }

    /// Current negotiation flags.
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    /// Signaling state of the peer connection.
    pub fn signaling_state(&self) -> SignalingState {
        self.peer.signaling_state()
    }

    /// Originate an offer if we are allowed to.
    ///
    /// Does nothing without a remote endpoint. The impolite endpoint sends
    /// `request-offer` instead. Unless `force` is set, a round already in
    /// flight is not duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if the local description cannot be
    /// produced or the outbox is closed.
    pub async fn create_offer_if_needed(
        &mut self,
        presence: &PresenceTracker,
        force: bool,
    ) -> Result<OfferOutcome, NegotiationError> {
        let Some(remote) = presence.remote_id() else {
            tracing::debug!("no remote endpoint, not offering");
            return Ok(OfferOutcome::NoRemote);
        };

        if !presence.role().is_polite() {
            tracing::debug!(peer_id = %remote, "impolite, requesting an offer");
            self.send(Signal::State(StateUpdate::request_offer()))?;
            return Ok(OfferOutcome::RequestedOffer);
        }

        if self.state.making_offer && !force {
            tracing::debug!("offer already in flight");
            return Ok(OfferOutcome::SkippedInFlight);
        }

        if self.peer.signaling_state() == SignalingState::HaveRemoteOffer {
            tracing::debug!("remote offer unanswered, deferring our own");
            self.state.renegotiate_pending = true;
            return Ok(OfferOutcome::Deferred);
        }

        self.state.making_offer = true;
        self.target = Some(remote.clone());
        let produced = self.peer.set_local_description().await;
        self.state.making_offer = false;
        let offer = produced?;

        // The offer carries every attached track.
        self.state.renegotiate_pending = false;
        tracing::debug!(peer_id = %remote, "sending offer");
        self.send(Signal::Offer { sdp: offer })?;
        self.flush_candidates()?;
        Ok(OfferOutcome::Sent)
    }

    /// Apply a remote offer and answer it when due.
    ///
    /// `sender` is the best-known originator of the message; the tracked
    /// remote id is used when the message carries none.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if the description cannot be applied,
    /// the answer cannot be produced, or the outbox is closed.
    pub async fn handle_offer(
        &mut self,
        presence: &PresenceTracker,
        sender: Option<&PeerId>,
        offer: &SessionDescription,
    ) -> Result<OfferReply, NegotiationError> {
        self.retarget(presence).await?;
        let origin = sender.or(presence.remote_id());
        let polite = Role::between(presence.local_id(), origin).is_polite();
        let collision = self.state.making_offer || !self.peer.signaling_state().is_stable();

        self.state.ignore_offer = !polite && collision;
        if self.state.ignore_offer {
            tracing::debug!(state = %self.peer.signaling_state(), "offer collision, ignoring");
            return Ok(OfferReply::Ignored);
        }

        if collision {
            tracing::debug!(state = %self.peer.signaling_state(), "offer collision, rolling back");
            self.peer.rollback_and_set_remote(offer).await?;
        } else {
            self.peer.set_remote_description(offer).await?;
        }
        self.target = origin.cloned();

        if self.peer.signaling_state() != SignalingState::HaveRemoteOffer {
            return Ok(OfferReply::Applied);
        }

        let answer = self.peer.set_local_description().await?;
        tracing::debug!("sending answer");
        self.send(Signal::Answer { sdp: answer })?;
        self.flush_candidates()?;
        Ok(OfferReply::Answered)
    }

    /// Apply a remote answer.
    ///
    /// A rejected answer withdraws our outstanding offer so the next round
    /// can start from `stable`. It is not retried.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Peer`] if the answer is not acceptable
    /// in the current state.
    pub async fn handle_answer(
        &mut self,
        answer: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        if let Err(e) = self.peer.set_remote_description(answer).await {
            if self.peer.signaling_state() == SignalingState::HaveLocalOffer {
                tracing::warn!(error = %e, "answer rejected, withdrawing our offer");
                self.peer.rollback().await?;
            }
            return Err(e.into());
        }
        tracing::debug!(state = %self.peer.signaling_state(), "answer applied");
        Ok(())
    }

    /// Add a remote candidate.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Peer`] if the candidate is rejected and
    /// no offer is being ignored.
    pub async fn handle_candidate(
        &mut self,
        candidate: &IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        match self.peer.add_ice_candidate(candidate).await {
            Ok(()) => Ok(CandidateOutcome::Added),
            Err(e) if self.state.ignore_offer => {
                tracing::debug!(error = %e, "candidate for an ignored offer dropped");
                Ok(CandidateOutcome::Suppressed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// React to a `state` message.
    ///
    /// Screen status is passed back to the caller. An offer request is
    /// honoured only by the polite endpoint: it adds receive slots and forces
    /// an offer, or defers one while its own offer is still unanswered.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if a forced offer fails.
    pub async fn handle_state(
        &mut self,
        presence: &PresenceTracker,
        sender: Option<&PeerId>,
        update: &StateUpdate,
    ) -> Result<StateOutcome, NegotiationError> {
        let mut outcome = StateOutcome {
            screen: update.screen,
            offer: None,
        };
        if !update.is_offer_request() {
            return Ok(outcome);
        }

        let polite = Role::between(presence.local_id(), sender.or(presence.remote_id())).is_polite();
        if !polite {
            tracing::debug!("offer request received while impolite, ignoring");
            return Ok(outcome);
        }

        self.retarget(presence).await?;
        if self.peer.signaling_state() == SignalingState::HaveLocalOffer {
            tracing::debug!("offer request while our offer is unanswered, deferring");
            self.state.renegotiate_pending = true;
            outcome.offer = Some(OfferOutcome::Deferred);
            return Ok(outcome);
        }

        let added = self.peer.ensure_receive_placeholders();
        if !added.is_empty() {
            tracing::debug!(?added, "added receive-only slots");
        }
        outcome.offer = Some(self.create_offer_if_needed(presence, true).await?);
        Ok(outcome)
    }

    /// Attach a local track and renegotiate.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if the track cannot be attached or the
    /// follow-up offer fails.
    pub async fn attach_track(
        &mut self,
        presence: &PresenceTracker,
        track: LocalTrack,
    ) -> Result<OfferOutcome, NegotiationError> {
        self.attach_tracks(presence, vec![track]).await
    }

    /// Attach several tracks, then renegotiate once.
    ///
    /// Without a known remote endpoint the round is owed and runs once one
    /// appears.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if a track cannot be attached or the
    /// follow-up offer fails. Tracks attached before the failure stay.
    pub async fn attach_tracks(
        &mut self,
        presence: &PresenceTracker,
        tracks: Vec<LocalTrack>,
    ) -> Result<OfferOutcome, NegotiationError> {
        for track in tracks {
            tracing::info!(track = %track.id, kind = %track.kind, "attaching local track");
            self.peer.add_track(track)?;
        }
        if presence.remote_id().is_none() {
            self.state.renegotiate_pending = true;
            return Ok(OfferOutcome::NoRemote);
        }
        self.create_offer_if_needed(presence, false).await
    }

    /// Detach a local track. Does not renegotiate.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Peer`] if no such track is attached.
    pub fn detach_track(&mut self, track_id: &str) -> Result<LocalTrack, NegotiationError> {
        let track = self.peer.remove_track(track_id)?;
        tracing::info!(track = %track.id, "detached local track");
        Ok(track)
    }

    /// Send a screen status to the remote side.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::OutboxClosed`] if the outbox is gone.
    pub fn announce_screen(&self, screen: ScreenState) -> Result<(), NegotiationError> {
        self.send(Signal::State(StateUpdate::screen(screen)))
    }

    /// Abandon a round started with a remote endpoint that is no longer the
    /// tracked one.
    ///
    /// A non-stable description is rolled back and the in-flight flags are
    /// cleared. A fresh round is owed if local tracks exist. Returns `true`
    /// if a round was abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Peer`] if the pending description cannot
    /// be rolled back.
    pub async fn retarget(
        &mut self,
        presence: &PresenceTracker,
    ) -> Result<bool, NegotiationError> {
        let Some(target) = self.target.as_ref() else {
            return Ok(false);
        };
        if Some(target) == presence.remote_id() {
            return Ok(false);
        }
        let previous = self.target.take();
        let state = self.peer.signaling_state();
        if state.is_stable() && !self.state.making_offer {
            return Ok(false);
        }

        tracing::info!(
            previous = ?previous,
            remote = ?presence.remote_id(),
            %state,
            "remote endpoint changed, abandoning negotiation round"
        );
        if !state.is_stable() {
            self.peer.rollback().await?;
        }
        self.state = NegotiationState {
            making_offer: false,
            ignore_offer: false,
            renegotiate_pending: self.state.renegotiate_pending || self.peer.has_local_tracks(),
        };
        Ok(true)
    }

    /// Run an owed offer round once the remote side is known and stable.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if the resumed round fails.
    pub async fn resume_pending(
        &mut self,
        presence: &PresenceTracker,
    ) -> Result<Option<OfferOutcome>, NegotiationError> {
        self.retarget(presence).await?;
        if !self.state.renegotiate_pending
            || presence.remote_id().is_none()
            || !self.peer.signaling_state().is_stable()
        {
            return Ok(None);
        }
        self.state.renegotiate_pending = false;
        if presence.role().is_polite() {
            self.peer.ensure_receive_placeholders();
        }
        tracing::debug!("resuming deferred negotiation");
        self.create_offer_if_needed(presence, false).await.map(Some)
    }

    /// Forget in-progress negotiation after the signaling channel reopened.
    ///
    /// Attached tracks are kept and a fresh round is owed if there are any.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Peer`] if the pending description cannot
    /// be rolled back.
    pub async fn reset_after_reconnect(&mut self) -> Result<(), NegotiationError> {
        if !self.peer.signaling_state().is_stable() {
            tracing::info!(state = %self.peer.signaling_state(), "rolling back after reconnect");
            self.peer.rollback().await?;
        }
        self.target = None;
        self.state = NegotiationState {
            making_offer: false,
            ignore_offer: false,
            renegotiate_pending: self.peer.has_local_tracks(),
        };
        Ok(())
    }

    fn flush_candidates(&mut self) -> Result<(), NegotiationError> {
        for candidate in self.peer.take_local_candidates() {
            self.send(Signal::Ice { candidate })?;
        }
        Ok(())
    }

    fn send(&self, signal: Signal) -> Result<(), NegotiationError> {
        self.outbox
            .send(Envelope::new(signal))
            .map_err(|_| NegotiationError::OutboxClosed)
    }
}
