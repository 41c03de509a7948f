//! `pairline`: headless call signaling client.
//!
//! Connects to a relay, joins a room, and negotiates with whoever else is
//! there. Media is simulated; the binary is useful for exercising a relay
//! and for watching negotiation in the logs.
//!
//! ```bash
//! cargo run --bin pairline -- --relay-url ws://127.0.0.1:8080 --attach-audio
//!
//! # Or via environment variables
//! PAIRLINE_RELAY_URL=ws://relay:8080 PAIRLINE_ROOM=standup cargo run --bin pairline
//! ```

use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use pairline::config::{CliArgs, ClientConfig};
use pairline::negotiation::{LocalTrack, SimulatedPeer};
use pairline::session::{self, SessionCommand, SessionEvent};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(url = %config.relay_url, room = %config.room, "pairline starting");

    let mut handle = session::spawn(SimulatedPeer::new(), config.channel_config());
    let commands = handle.commands();
    if config.attach_audio {
        let _ = commands
            .send(SessionCommand::AttachTrack(LocalTrack::microphone()))
            .await;
    }
    if config.share_screen {
        let _ = commands
            .send(SessionCommand::StartScreen {
                system_audio: false,
            })
            .await;
    }

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    if let Some(peer) = handle.shutdown().await {
        tracing::info!(tracks = peer.tracks().len(), "pairline exiting");
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ChannelUp => tracing::info!("connected to relay"),
        SessionEvent::ChannelDown => tracing::info!("disconnected from relay"),
        SessionEvent::LocalIdentity(id) => tracing::info!(peer_id = %id, "welcomed"),
        SessionEvent::PresenceChanged { online, remote } => {
            tracing::info!(online, remote = ?remote, "presence");
        }
        SessionEvent::RemoteScreenCleared => tracing::info!("remote screen share stopped"),
        SessionEvent::RemoteScreenStarted => tracing::info!("remote screen share started"),
        SessionEvent::SignalingStateChanged(state) => {
            tracing::info!(%state, "signaling state");
        }
    }
}

/// Initialize logging to stdout, or to `file_path` when given.
///
/// For file logging, returns a [`WorkerGuard`] that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let log_dir = log_path.parent().filter(|d| !d.as_os_str().is_empty());
    let log_dir = log_dir.unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
