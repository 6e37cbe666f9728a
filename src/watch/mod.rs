//! Bidirectional clipboard watch between this machine and one peer
//!
//! Polling based. Each tick reads both clipboards, compares their SHA-256
//! fingerprints against the last values seen, and propagates whichever side
//! changed. After a propagation both baselines are set to the propagated
//! value, so the copy that just landed on the other side is not picked up as
//! a fresh change and sent back.
//!
//! When both sides changed to different content within one tick, nothing is
//! overwritten: the conflict is logged and recorded in history, and both
//! values become the new baselines. The next one-sided change wins.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clipboard::{ClipboardError, ClipboardProvider};
use crate::config::MIN_WATCH_INTERVAL_MS;
use crate::crypto;
use crate::history::HistoryTracker;
use crate::transport::{Peer, PeerError, PeerTransport};

/// Loop phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Polling,
    Propagating,
    Stopped,
}

/// Per-session fingerprints; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub last_local: Option<String>,
    pub last_remote: Option<String>,
    pub phase: WatchPhase,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            last_local: None,
            last_remote: None,
            phase: WatchPhase::Idle,
        }
    }
}

/// Both sides changed to different content in the same tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflict with peer '{peer}': local changed to {local} and remote changed to {remote}; neither side was overwritten")]
pub struct ConflictError {
    pub peer: String,
    pub local: String,
    pub remote: String,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// First tick: baselines recorded, nothing propagated
    Seeded,
    /// Nothing to do
    Unchanged,
    /// Both sides already hold the same content
    Converged,
    /// Change not propagated (empty or oversized content)
    Skipped { reason: String },
    SentToPeer { size: usize },
    ReceivedFromPeer { size: usize },
    Conflict(ConflictError),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("local clipboard: {0}")]
    Clipboard(#[from] ClipboardError),
}

impl WatchError {
    /// Transient errors are retried with backoff; anything else stops the loop
    pub fn is_transient(&self) -> bool {
        match self {
            WatchError::Peer(_) => true,
            WatchError::Clipboard(ClipboardError::Platform(_)) => true,
            WatchError::Clipboard(_) => false,
        }
    }
}

/// Exponential backoff after transient failures
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Random spread applied to each delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = capped * self.jitter_factor * (rand::random::<f64>() * 2.0 - 1.0);
        let delay = (capped + jitter).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ticks: u64,
    pub sent: u64,
    pub received: u64,
    pub conflicts: u64,
    pub failures: u64,
}

pub struct WatchLoop {
    clipboard: Arc<dyn ClipboardProvider>,
    transport: PeerTransport,
    peer: Peer,
    interval: Duration,
    backoff: BackoffConfig,
    max_size: usize,
    history: Option<Arc<HistoryTracker>>,
    state: WatchState,
}

impl WatchLoop {
    /// `interval` is raised to the 250 ms floor if shorter
    pub fn new(
        clipboard: Arc<dyn ClipboardProvider>,
        transport: PeerTransport,
        peer: Peer,
        interval: Duration,
    ) -> Self {
        Self {
            clipboard,
            transport,
            peer,
            interval: interval.max(Duration::from_millis(MIN_WATCH_INTERVAL_MS)),
            backoff: BackoffConfig::default(),
            max_size: usize::MAX,
            history: None,
            state: WatchState::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryTracker>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Poll until `shutdown` flips to true or a fatal error occurs.
    ///
    /// Shutdown is only observed between ticks; a tick already in flight
    /// completes, including any write to the peer.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WatchSummary, WatchError> {
        info!(
            peer = %self.peer.name,
            target = %self.peer.target,
            interval_ms = self.interval.as_millis() as u64,
            "watch started"
        );

        let mut summary = WatchSummary::default();
        let mut consecutive_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(outcome) => {
                    summary.ticks += 1;
                    consecutive_failures = 0;
                    match outcome {
                        TickOutcome::SentToPeer { .. } => summary.sent += 1,
                        TickOutcome::ReceivedFromPeer { .. } => summary.received += 1,
                        TickOutcome::Conflict(_) => summary.conflicts += 1,
                        _ => {}
                    }
                    self.interval
                }
                Err(e) if e.is_transient() => {
                    summary.ticks += 1;
                    summary.failures += 1;
                    consecutive_failures += 1;
                    let delay = self.backoff.delay(consecutive_failures);
                    warn!(
                        peer = %self.peer.name,
                        attempt = consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "watch tick failed: {}",
                        e
                    );
                    delay
                }
                Err(e) => {
                    error!(peer = %self.peer.name, "watch stopped: {}", e);
                    self.state.phase = WatchPhase::Stopped;
                    return Err(e);
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state.phase = WatchPhase::Stopped;
        info!(
            peer = %self.peer.name,
            sent = summary.sent,
            received = summary.received,
            conflicts = summary.conflicts,
            "watch stopped"
        );
        Ok(summary)
    }

    /// One poll-and-propagate cycle.
    ///
    /// Baselines only move when the whole tick succeeds, so a failed send
    /// is retried on the next tick.
    pub async fn tick(&mut self) -> Result<TickOutcome, WatchError> {
        self.state.phase = WatchPhase::Polling;
        let result = self.poll_and_propagate().await;
        self.state.phase = WatchPhase::Idle;
        result
    }

    async fn poll_and_propagate(&mut self) -> Result<TickOutcome, WatchError> {
        let local = self.clipboard.read().await?;
        let remote = self.transport.read_from(&self.peer).await?;
        let local_fp = crypto::fingerprint(&local);
        let remote_fp = crypto::fingerprint(&remote);

        let (Some(last_local), Some(last_remote)) =
            (self.state.last_local.clone(), self.state.last_remote.clone())
        else {
            debug!(peer = %self.peer.name, "watch baselines seeded");
            self.commit(local_fp, remote_fp);
            return Ok(TickOutcome::Seeded);
        };

        let local_changed = last_local != local_fp;
        let remote_changed = last_remote != remote_fp;

        if !local_changed && !remote_changed {
            return Ok(TickOutcome::Unchanged);
        }

        if local_fp == remote_fp {
            self.commit(local_fp, remote_fp);
            return Ok(TickOutcome::Converged);
        }

        if local_changed && remote_changed {
            let conflict = ConflictError {
                peer: self.peer.name.clone(),
                local: short(&local_fp).to_string(),
                remote: short(&remote_fp).to_string(),
            };
            warn!(peer = %self.peer.name, "{}", conflict);
            self.record("watch:conflict", &local).await;
            self.commit(local_fp, remote_fp);
            return Ok(TickOutcome::Conflict(conflict));
        }

        if local_changed {
            if let Some(reason) = self.unsendable(&local) {
                debug!(peer = %self.peer.name, "local change not sent: {}", reason);
                self.commit(local_fp, remote_fp);
                return Ok(TickOutcome::Skipped { reason });
            }

            self.state.phase = WatchPhase::Propagating;
            self.transport.send_to(&self.peer, &local).await?;
            info!(peer = %self.peer.name, size = local.len(), "local clipboard sent to peer");
            self.record("watch:send", &local).await;
            self.commit(local_fp.clone(), local_fp);
            return Ok(TickOutcome::SentToPeer { size: local.len() });
        }

        if let Some(reason) = self.unsendable(&remote) {
            debug!(peer = %self.peer.name, "remote change not applied: {}", reason);
            self.commit(local_fp, remote_fp);
            return Ok(TickOutcome::Skipped { reason });
        }

        self.state.phase = WatchPhase::Propagating;
        self.clipboard.write(&remote).await?;
        info!(peer = %self.peer.name, size = remote.len(), "peer clipboard applied locally");
        self.record("watch:recv", &remote).await;
        self.commit(remote_fp.clone(), remote_fp);
        Ok(TickOutcome::ReceivedFromPeer { size: remote.len() })
    }

    fn commit(&mut self, local: String, remote: String) {
        self.state.last_local = Some(local);
        self.state.last_remote = Some(remote);
    }

    /// Empty content would wipe the other side
    fn unsendable(&self, content: &[u8]) -> Option<String> {
        if content.is_empty() {
            Some("content is empty".to_string())
        } else if content.len() > self.max_size {
            Some(format!(
                "{} bytes exceeds the {} byte limit",
                content.len(),
                self.max_size
            ))
        } else {
            None
        }
    }

    async fn record(&self, command: &str, content: &[u8]) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(command, &self.peer.name, content).await {
                warn!("failed to record history: {}", e);
            }
        }
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
