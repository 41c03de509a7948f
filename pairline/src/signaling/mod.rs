//! Client side of the signaling relay connection.
//!
//! [`SignalingChannel::spawn`] starts a supervisor task that owns one
//! WebSocket connection at a time. It joins the configured room on every
//! open, answers relay pings itself, stamps outbound envelopes with the
//! identifier from the latest `welcome`, and reconnects from scratch after
//! a fixed delay whenever the connection drops or cannot be made.
//!
//! ```text
//! session ── Envelope ──▶ supervisor ── text frame ──▶ relay
//! session ◀─ ChannelEvent ─ supervisor ◀─ text frame ── relay
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairline_proto::codec::{self, CodecError};
use pairline_proto::envelope::{Envelope, Signal};
use pairline_proto::identity::{PeerId, RoomName};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default delay before reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Default timeout for opening the WebSocket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the event queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Errors on one connection attempt or one open connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The WebSocket handshake did not finish in time.
    #[error("connect to {url} timed out")]
    ConnectTimeout {
        /// Relay URL.
        url: String,
    },

    /// The WebSocket layer failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outbound envelope could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    /// The relay closed the connection.
    #[error("connection closed by relay")]
    Closed,
}

/// What the supervisor reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A connection is open and `join` has been queued.
    Opened,
    /// A decoded inbound message (pings are answered, not forwarded).
    Message(Envelope),
    /// The connection dropped or could not be made; a reconnect follows.
    Closed,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay WebSocket URL.
    pub url: String,
    /// Room joined on every open.
    pub room: RoomName,
    /// Pause between a close and the next attempt.
    pub reconnect_delay: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Capacity of the event queue.
    pub capacity: usize,
}

impl ChannelConfig {
    /// Config with default timing for `url` and `room`.
    pub fn new(url: impl Into<String>, room: RoomName) -> Self {
        Self {
            url: url.into(),
            room,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle to a running signaling supervisor.
///
/// The supervisor stops once every clone of the outbound sender is dropped
/// or the event receiver is dropped. The outbound queue is unbounded; only
/// the event queue is bounded.
#[derive(Debug)]
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<Envelope>,
    events: mpsc::Receiver<ChannelEvent>,
    task: JoinHandle<()>,
}

impl SignalingChannel {
    /// Start the supervisor. Connection happens in the background.
    #[must_use]
    pub fn spawn(config: ChannelConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(capacity);
        let task = tokio::spawn(supervise(config, outbound_rx, events_tx));
        Self {
            outbound,
            events,
            task,
        }
    }

    /// A sender for outbound envelopes. Envelopes queued while disconnected
    /// are discarded when the next connection opens.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.outbound.clone()
    }

    /// Next event, or `None` once the supervisor stopped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Split into the outbound sender, the event receiver and the task.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::Receiver<ChannelEvent>,
        JoinHandle<()>,
    ) {
        (self.outbound, self.events, self.task)
    }
}

/// How one connection ended.
enum Ended {
    /// The consumer went away; stop for good.
    Stop,
    /// The transport dropped; reconnect.
    Disconnected(ChannelError),
}

async fn supervise(
    config: ChannelConfig,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    events: mpsc::Sender<ChannelEvent>,
) {
    loop {
        match connect(&config).await {
            Ok(ws) => {
                // Anything queued while we were down refers to a dead session.
                let mut discarded = 0usize;
                while outbound.try_recv().is_ok() {
                    discarded += 1;
                }
                if discarded > 0 {
                    tracing::debug!(discarded, "dropped envelopes queued while disconnected");
                }
                tracing::info!(url = %config.url, room = %config.room, "signaling channel open");
                if events.send(ChannelEvent::Opened).await.is_err() {
                    return;
                }
                match run_connection(ws, &config.room, &mut outbound, &events).await {
                    Ended::Stop => return,
                    Ended::Disconnected(e) => {
                        tracing::info!(error = %e, "signaling channel closed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "signaling connect failed");
            }
        }

        if events.send(ChannelEvent::Closed).await.is_err() {
            return;
        }
        if !wait_before_reconnect(config.reconnect_delay, &mut outbound, &events).await {
            return;
        }
        tracing::info!(url = %config.url, "reconnecting");
    }
}

/// Sleep out the reconnect delay. Returns `false` if the consumer went away.
async fn wait_before_reconnect(
    delay: Duration,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
    events: &mpsc::Sender<ChannelEvent>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            () = events.closed() => return false,
            queued = outbound.recv() => {
                if queued.is_none() {
                    return false;
                }
                // Nowhere to send it.
            }
        }
    }
}

async fn connect(config: &ChannelConfig) -> Result<Ws, ChannelError> {
    let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(&config.url))
        .await
        .map_err(|_| ChannelError::ConnectTimeout {
            url: config.url.clone(),
        })??;
    Ok(ws)
}

async fn run_connection(
    ws: Ws,
    room: &RoomName,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
    events: &mpsc::Sender<ChannelEvent>,
) -> Ended {
    let (mut sink, mut stream) = ws.split();
    let mut local_id: Option<PeerId> = None;

    let join = Envelope::new(Signal::Join {}).in_room(room.clone());
    if let Err(e) = send_envelope(&mut sink, join, room, local_id.as_ref()).await {
        return Ended::Disconnected(e);
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ended::Disconnected(ChannelError::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Ended::Disconnected(e.into()),
                };
                let envelope = match codec::decode(text.as_str()) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed signaling frame, skipping");
                        continue;
                    }
                };
                match &envelope.signal {
                    Signal::Ping { ts } => {
                        tracing::debug!(ts, "ping");
                        let pong = Envelope::new(Signal::Pong { ts: *ts });
                        if let Err(e) = send_envelope(&mut sink, pong, room, local_id.as_ref()).await {
                            return Ended::Disconnected(e);
                        }
                        continue;
                    }
                    Signal::Welcome { id } => local_id = Some(id.clone()),
                    _ => {}
                }
                if events.send(ChannelEvent::Message(envelope)).await.is_err() {
                    return Ended::Stop;
                }
            }
            queued = outbound.recv() => {
                let Some(envelope) = queued else {
                    let _ = sink.close().await;
                    return Ended::Stop;
                };
                if let Err(e) = send_envelope(&mut sink, envelope, room, local_id.as_ref()).await {
                    return Ended::Disconnected(e);
                }
            }
            () = events.closed() => {
                let _ = sink.close().await;
                return Ended::Stop;
            }
        }
    }
}

async fn send_envelope<S>(
    sink: &mut S,
    envelope: Envelope,
    room: &RoomName,
    local_id: Option<&PeerId>,
) -> Result<(), ChannelError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = codec::encode(&stamp(envelope, room, local_id))?;
    sink.send(Message::text(text)).await?;
    Ok(())
}

/// Fill in the room if missing and the sender stamp if known.
fn stamp(envelope: Envelope, room: &RoomName, local_id: Option<&PeerId>) -> Envelope {
    let envelope = if envelope.room.is_none() {
        envelope.in_room(room.clone())
    } else {
        envelope
    };
    envelope.with_sender(local_id.cloned())
}
