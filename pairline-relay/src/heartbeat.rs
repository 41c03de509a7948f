//! Liveness monitor.
//!
//! Application-level `ping`/`pong` over the signaling protocol itself, so a
//! client that stops answering (a frozen renderer, a half-open socket) is
//! evicted even though its transport still looks open.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::relay::RelayState;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Silence after which a connection is terminated.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Spawn the periodic sweep for `state`.
///
/// The first sweep runs one interval after the call.
pub fn spawn_monitor(state: Arc<RelayState>) -> JoinHandle<()> {
    let HeartbeatConfig { interval, timeout } = state.heartbeat();
    tracing::info!(
        interval_ms = interval.as_millis(),
        timeout_ms = timeout.as_millis(),
        "heartbeat monitor started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = state.sweep(Instant::now());
            tracing::debug!(
                pinged = report.pinged,
                evicted = report.evicted.len(),
                "heartbeat sweep"
            );
        }
    })
}
