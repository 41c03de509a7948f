//! Relay server core: shared state, WebSocket handler, and message routing.
//!
//! Every accepted connection gets a fresh identifier and is placed in the
//! default room. Negotiation messages (`offer`, `answer`, `ice`, `state`) are
//! stamped with the sender's identifier and room and forwarded to every other
//! member of that room. The relay never interprets their payloads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pairline_proto::codec::{self, Frame};
use pairline_proto::envelope::{Envelope, Signal, SignalKind, unix_millis};
use pairline_proto::identity::{PeerId, RoomName};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RelayConfig;
use crate::heartbeat::{self, HeartbeatConfig};
use crate::rooms::{Member, Outbound, RoomRegistry};

/// Outcome of one heartbeat pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were sent a `ping`.
    pub pinged: usize,
    /// Connections that were terminated for missing too many replies.
    pub evicted: Vec<PeerId>,
}

/// Shared relay server state.
///
/// The registry sits behind one mutex. Join, leave, relay and the heartbeat
/// sweep each hold it for their whole duration, so membership broadcasts
/// are never interleaved with a half-applied change.
pub struct RelayState {
    registry: Mutex<RoomRegistry>,
    next_id: AtomicU64,
    heartbeat: HeartbeatConfig,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with the default room and heartbeat timing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RelayConfig::default())
    }

    /// Creates relay state from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            registry: Mutex::new(RoomRegistry::new(config.default_room.clone())),
            next_id: AtomicU64::new(0),
            heartbeat: config.heartbeat,
        }
    }

    /// Heartbeat timing this relay runs with.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Allocate the next connection identifier (`c1`, `c2`, ...).
    pub fn next_connection_id(&self) -> PeerId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        PeerId::new(format!("c{n}"))
    }

    /// Place a new connection in the default room.
    pub fn admit(&self, member: Member) {
        let mut registry = self.registry.lock();
        let room = registry.default_room().clone();
        place(&mut registry, &room, member);
    }

    /// Move a connection to another room.
    ///
    /// Joining the room the connection is already in is a no-op. Returns
    /// `true` if the connection moved.
    pub fn join(&self, id: &PeerId, room: &RoomName) -> bool {
        let mut registry = self.registry.lock();
        if registry.room_of(id) == Some(room) {
            tracing::debug!(peer_id = %id, room = %room, "already in room, join ignored");
            return false;
        }
        let Some((old_room, member)) = registry.remove(id) else {
            return false;
        };
        tracing::info!(peer_id = %id, from = %old_room, to = %room, "connection switching rooms");
        broadcast_peers(&registry, &old_room);
        place(&mut registry, room, member);
        true
    }

    /// Stamp a negotiation message and forward it to the sender's room.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn relay(&self, id: &PeerId, mut frame: Frame) -> usize {
        let registry = self.registry.lock();
        let Some(room_name) = registry.room_of(id).cloned() else {
            tracing::warn!(peer_id = %id, "relay from connection without a room");
            return 0;
        };
        frame.stamp(id, &room_name);
        let text = Utf8Bytes::from(frame.to_text());

        let delivered = registry.lookup(&room_name).map_or(0, |room| {
            room.members()
                .filter(|m| m.id() != id)
                .filter(|m| m.send(&text))
                .count()
        });
        tracing::debug!(
            peer_id = %id,
            room = %room_name,
            kind = %frame.kind,
            delivered,
            "relayed message"
        );
        delivered
    }

    /// Record a `pong` from a connection.
    pub fn record_pong(&self, id: &PeerId, now: Instant) -> bool {
        self.registry.lock().touch(id, now)
    }

    /// Remove a connection from its room and notify the remaining members.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn leave(&self, id: &PeerId) -> bool {
        let mut registry = self.registry.lock();
        let Some((room, _member)) = registry.remove(id) else {
            return false;
        };
        tracing::info!(peer_id = %id, room = %room, "connection left room");
        broadcast_peers(&registry, &room);
        true
    }

    /// Run one heartbeat pass at `now`.
    ///
    /// Connections silent for longer than the timeout are terminated and
    /// removed; every other connection is sent a `ping`.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut registry = self.registry.lock();
        let evicted = registry.stale(now, self.heartbeat.timeout);

        for id in &evicted {
            if let Some((room, member)) = registry.remove(id) {
                tracing::warn!(peer_id = %id, room = %room, "heartbeat timed out, terminating");
                member.terminate();
                broadcast_peers(&registry, &room);
            }
        }

        let ping = match codec::encode(&Envelope::new(Signal::Ping { ts: unix_millis() })) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode ping");
                return SweepReport {
                    pinged: 0,
                    evicted,
                };
            }
        };
        let pinged = registry
            .rooms()
            .flat_map(|(_, room)| room.members())
            .filter(|m| m.send(&ping))
            .count();

        SweepReport { pinged, evicted }
    }

    /// Members of a room in join order, if the room exists.
    #[must_use]
    pub fn room_members(&self, room: &RoomName) -> Option<Vec<PeerId>> {
        self.registry.lock().lookup(room).map(crate::rooms::Room::ids)
    }

    /// Total number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.lock().connection_count()
    }
}

/// Add a member to a room, greet it, and announce the new membership.
fn place(registry: &mut RoomRegistry, room: &RoomName, member: Member) {
    let id = member.id().clone();
    registry.add(room, member);
    registry.touch(&id, Instant::now());

    let welcome = Envelope::new(Signal::Welcome { id: id.clone() }).in_room(room.clone());
    match codec::encode(&welcome) {
        Ok(text) => {
            if let Some(m) = registry
                .lookup(room)
                .and_then(|r| r.members().find(|m| m.id() == &id))
            {
                m.send(&Utf8Bytes::from(text));
            }
        }
        Err(e) => tracing::error!(peer_id = %id, error = %e, "failed to encode welcome"),
    }
    tracing::info!(peer_id = %id, room = %room, "connection joined room");
    broadcast_peers(registry, room);
}

/// Send the current membership of a room to all of its members.
fn broadcast_peers(registry: &RoomRegistry, room_name: &RoomName) {
    let Some(room) = registry.lookup(room_name) else {
        return;
    };
    let ids = room.ids();
    tracing::info!(room = %room_name, count = ids.len(), ids = ?ids, "room membership");
    let peers = Envelope::new(Signal::Peers {
        count: ids.len(),
        ids,
    })
    .in_room(room_name.clone());
    match codec::encode(&peers) {
        Ok(text) => {
            let text = Utf8Bytes::from(text);
            for member in room.members() {
                member.send(&text);
            }
        }
        Err(e) => tracing::error!(room = %room_name, error = %e, "failed to encode peers"),
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Allocate an identifier and join the default room.
/// 2. Forward queued frames to the socket and route incoming frames.
/// 3. Stop when either side closes or the heartbeat terminates the
///    connection, then leave the room.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let conn_id = state.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let (kill_tx, kill_rx) = oneshot::channel();
    tracing::info!(peer_id = %conn_id, "connection accepted");
    state.admit(Member::new(conn_id.clone(), tx, kill_tx, Instant::now()));

    let writer_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(Outbound::Text(text)) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                tracing::warn!(peer_id = %writer_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_id = conn_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => handle_text(&reader_id, text.as_str(), &reader_state),
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&reader_id, text, &reader_state),
                    Err(_) => {
                        tracing::warn!(peer_id = %reader_id, "dropping non-UTF-8 binary frame");
                    }
                },
                Message::Close(_) => {
                    tracing::debug!(peer_id = %reader_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
        _ = kill_rx => {
            read_task.abort();
            write_task.abort();
            tracing::info!(peer_id = %conn_id, "connection terminated");
        }
    }

    state.leave(&conn_id);
    tracing::info!(peer_id = %conn_id, "connection closed");
}

/// Route one text frame from a connection.
fn handle_text(conn_id: &PeerId, text: &str, state: &RelayState) {
    let frame = match codec::decode_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(peer_id = %conn_id, error = %e, "dropping malformed message");
            return;
        }
    };

    match frame.kind {
        SignalKind::Pong => {
            state.record_pong(conn_id, Instant::now());
        }
        SignalKind::Join => match frame.room() {
            Some(room) if !room.is_empty() => {
                state.join(conn_id, &RoomName::new(room));
            }
            _ => tracing::debug!(peer_id = %conn_id, "join without room ignored"),
        },
        kind if kind.is_relayed() => {
            state.relay(conn_id, frame);
        }
        kind => {
            tracing::warn!(peer_id = %conn_id, kind = %kind, "unexpected message type from client");
        }
    }
}

/// Starts the relay server on the given address with default settings.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server and its heartbeat monitor with the given state.
///
/// The returned handle completes when the server stops; the heartbeat
/// monitor is stopped with it.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(ws_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let monitor = heartbeat::spawn_monitor(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
        monitor.abort();
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
