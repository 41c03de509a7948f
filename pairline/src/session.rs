//! One call: signaling channel, presence and negotiation under a single task.
//!
//! [`spawn`] starts the signaling supervisor and a session task that
//! consumes channel events and [`SessionCommand`]s strictly one at a time.
//! The task owns the [`PresenceTracker`] and the [`NegotiationCoordinator`],
//! so nothing else mutates negotiation state. UI-facing changes come out as
//! [`SessionEvent`]s.

use pairline_proto::envelope::{Envelope, ScreenState, Signal};
use pairline_proto::identity::{PeerId, RoomName};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::negotiation::{
    LocalTrack, NegotiationCoordinator, NegotiationError, PeerConnection, PeerError,
    SignalingState, StateOutcome,
};
use crate::presence::{PresenceChange, PresenceTracker};
use crate::signaling::{ChannelConfig, ChannelEvent, SignalingChannel};

/// Requests from the UI or the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Attach a local track and renegotiate.
    AttachTrack(LocalTrack),
    /// Detach a local track by id. Does not renegotiate.
    DetachTrack(String),
    /// Attach screen tracks, renegotiate, then announce `screen:on`.
    StartScreen {
        /// Also attach system audio.
        system_audio: bool,
    },
    /// Detach screen tracks and announce `screen:off`.
    StopScreen,
    /// Stop the session.
    Shutdown,
}

/// Changes the UI collaborator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The signaling channel opened.
    ChannelUp,
    /// The signaling channel closed; a reconnect follows.
    ChannelDown,
    /// The relay assigned us an identifier.
    LocalIdentity(PeerId),
    /// Room presence changed.
    PresenceChanged {
        /// Someone else is in the room.
        online: bool,
        /// The endpoint negotiation targets.
        remote: Option<PeerId>,
    },
    /// The remote side stopped sharing its screen.
    RemoteScreenCleared,
    /// The remote side started sharing its screen.
    RemoteScreenStarted,
    /// The peer connection's signaling state changed.
    SignalingStateChanged(SignalingState),
}

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle<P> {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<P>,
}

impl<P> SessionHandle<P> {
    /// A sender for commands.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Next event, or `None` once the session stopped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Stop the session and get the peer connection back.
    ///
    /// Returns `None` if the session task panicked or was cancelled.
    pub async fn shutdown(self) -> Option<P> {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        drop(self.events);
        self.task.await.ok()
    }
}

/// Start a session over `peer`, connecting as described by `channel`.
pub fn spawn<P>(peer: P, channel: ChannelConfig) -> SessionHandle<P>
where
    P: PeerConnection + 'static,
{
    let capacity = channel.capacity.max(1);
    let room = channel.room.clone();
    let (outbox, channel_events, channel_task) = SignalingChannel::spawn(channel).into_parts();
    let (commands, command_rx) = mpsc::channel(capacity);
    let (events_tx, events) = mpsc::channel(capacity);

    let session = Session {
        room,
        presence: PresenceTracker::new(),
        coordinator: NegotiationCoordinator::new(peer, outbox),
        events: events_tx,
        reported: SignalingState::Stable,
    };
    let task = tokio::spawn(async move {
        let peer = session.run(channel_events, command_rx).await;
        channel_task.abort();
        peer
    });

    SessionHandle {
        commands,
        events,
        task,
    }
}

struct Session<P> {
    /// Room this session joins. The relay admits every connection to its
    /// default room first, so traffic from any other room is stale.
    room: RoomName,
    presence: PresenceTracker,
    coordinator: NegotiationCoordinator<P>,
    events: mpsc::Sender<SessionEvent>,
    reported: SignalingState,
}

impl<P: PeerConnection> Session<P> {
    async fn run(
        mut self,
        mut channel_events: mpsc::Receiver<ChannelEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> P {
        loop {
            tokio::select! {
                event = channel_events.recv() => match event {
                    Some(event) => self.on_channel(event).await,
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
            self.report_signaling_state().await;
        }
        tracing::info!("session stopped");
        self.coordinator.into_peer()
    }

    async fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.emit(SessionEvent::ChannelUp).await;
                if let Err(e) = self.coordinator.reset_after_reconnect().await {
                    tracing::warn!(error = %e, "could not reset negotiation after reconnect");
                }
            }
            ChannelEvent::Closed => {
                let change = self.presence.reset();
                self.emit(SessionEvent::ChannelDown).await;
                self.presence_changed(change).await;
            }
            ChannelEvent::Message(envelope) => {
                if let Some(room) = envelope.room.as_ref()
                    && *room != self.room
                {
                    tracing::debug!(
                        kind = %envelope.signal.kind(),
                        %room,
                        "ignoring message from another room"
                    );
                    return;
                }
                self.on_message(envelope).await;
                self.resume_pending().await;
            }
        }
    }

    async fn on_message(&mut self, envelope: Envelope) {
        let sender = envelope.originator().cloned();
        match envelope.signal {
            Signal::Welcome { id } => {
                let change = self.presence.on_welcome(id.clone());
                self.emit(SessionEvent::LocalIdentity(id)).await;
                self.presence_changed(change).await;
            }
            Signal::Peers { count, ids } => {
                let change = self.presence.on_peers(count, ids);
                self.presence_changed(change).await;
            }
            Signal::Offer { sdp } => {
                match self
                    .coordinator
                    .handle_offer(&self.presence, sender.as_ref(), &sdp)
                    .await
                {
                    Ok(reply) => tracing::debug!(?reply, "offer handled"),
                    Err(e) => tracing::warn!(error = %e, "failed to handle offer"),
                }
            }
            Signal::Answer { sdp } => {
                if let Err(e) = self.coordinator.handle_answer(&sdp).await {
                    tracing::warn!(error = %e, "failed to apply answer");
                }
            }
            Signal::Ice { candidate } => {
                if let Err(e) = self.coordinator.handle_candidate(&candidate).await {
                    tracing::warn!(error = %e, "failed to add remote candidate");
                }
            }
            Signal::State(update) => {
                match self
                    .coordinator
                    .handle_state(&self.presence, sender.as_ref(), &update)
                    .await
                {
                    Ok(StateOutcome { screen, .. }) => match screen {
                        Some(ScreenState::Off) => self.emit(SessionEvent::RemoteScreenCleared).await,
                        Some(ScreenState::On) => self.emit(SessionEvent::RemoteScreenStarted).await,
                        None => {}
                    },
                    Err(e) => tracing::warn!(error = %e, "failed to handle state message"),
                }
            }
            other @ (Signal::Join {} | Signal::Ping { .. } | Signal::Pong { .. }) => {
                tracing::debug!(kind = %other.kind(), "ignoring unexpected message");
            }
        }
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AttachTrack(track) => {
                if let Err(e) = self.coordinator.attach_track(&self.presence, track).await {
                    tracing::warn!(error = %e, "failed to attach track");
                }
            }
            SessionCommand::DetachTrack(id) => {
                if let Err(e) = self.coordinator.detach_track(&id) {
                    tracing::warn!(error = %e, "failed to detach track");
                }
            }
            SessionCommand::StartScreen { system_audio } => {
                let mut tracks = vec![LocalTrack::screen_video()];
                if system_audio {
                    tracks.push(LocalTrack::screen_audio());
                }
                if let Err(e) = self.coordinator.attach_tracks(&self.presence, tracks).await {
                    tracing::warn!(error = %e, "failed to start screen share");
                    return;
                }
                if let Err(e) = self.coordinator.announce_screen(ScreenState::On) {
                    tracing::warn!(error = %e, "failed to announce screen share");
                }
            }
            SessionCommand::StopScreen => {
                if let Err(e) = self.coordinator.detach_track(&LocalTrack::screen_video().id) {
                    tracing::warn!(error = %e, "failed to detach screen video");
                }
                // System audio is optional.
                match self.coordinator.detach_track(&LocalTrack::screen_audio().id) {
                    Ok(_) | Err(NegotiationError::Peer(PeerError::UnknownTrack(_))) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to detach screen audio"),
                }
                if let Err(e) = self.coordinator.announce_screen(ScreenState::Off) {
                    tracing::warn!(error = %e, "failed to announce screen stop");
                }
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn presence_changed(&mut self, change: PresenceChange) {
        if change.is_empty() {
            return;
        }
        tracing::info!(
            online = self.presence.is_online(),
            remote = ?self.presence.remote_id(),
            "presence changed"
        );
        self.emit(SessionEvent::PresenceChanged {
            online: self.presence.is_online(),
            remote: self.presence.remote_id().cloned(),
        })
        .await;
    }

    async fn resume_pending(&mut self) {
        if let Err(e) = self.coordinator.resume_pending(&self.presence).await {
            tracing::warn!(error = %e, "deferred negotiation failed");
        }
    }

    async fn report_signaling_state(&mut self) {
        let state = self.coordinator.signaling_state();
        if state != self.reported {
            self.reported = state;
            tracing::debug!(%state, "signaling state changed");
            self.emit(SessionEvent::SignalingStateChanged(state)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // The UI may have gone away; the session keeps running.
        let _ = self.events.send(event).await;
    }
}
