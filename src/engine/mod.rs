//! Core engine: bet placement, result watching and the round loop.
//!
//! Shared plumbing lives here: loop timings, the cancellation token every
//! wait goes through, and the outbound event bus.

pub mod detector;
pub mod executor;
pub mod orchestrator;
pub mod watcher;

use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use crate::types::GameState;

// ---------------------------------------------------------------------------
// Timings
// ---------------------------------------------------------------------------

/// Every delay the round loop uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// Dice area capture interval.
    pub poll_interval: Duration,
    /// How long a fingerprint must stay unchanged before classification.
    pub stable_duration: Duration,
    /// Give up waiting for a result after this long.
    pub detection_timeout: Duration,
    /// Post-click delay for ordinary clicks.
    pub click_delay: Duration,
    /// Pause between repeated clicks (X2, scroll).
    pub between_clicks: Duration,
    /// Wait before retrying a transient classifier failure.
    pub transient_backoff: Duration,
    pub skip_round_wait: Duration,
    pub post_round_wait: Duration,
    /// Recheck interval while paused.
    pub pause_check: Duration,
    /// Bounded wait for the worker when stopping.
    pub stop_join: Duration,
    /// Classifier attempts per round.
    pub max_attempts: u32,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stable_duration: Duration::from_millis(1_500),
            detection_timeout: Duration::from_secs(300),
            click_delay: Duration::from_millis(500),
            between_clicks: Duration::from_millis(300),
            transient_backoff: Duration::from_millis(2_000),
            skip_round_wait: Duration::from_millis(2_000),
            post_round_wait: Duration::from_millis(5_000),
            pause_check: Duration::from_millis(500),
            stop_join: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Read side of the stop signal. A dropped sender counts as cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A sender and its token, not yet cancelled.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::new(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which also ends the wait.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Sleep unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Messages published by the round loop.
#[derive(Debug, Clone)]
pub enum GameEvent {
    Log(String),
    Error {
        message: String,
        cause: Option<String>,
    },
    /// Snapshot after the state changed.
    State(GameState),
    Stopped {
        reason: String,
    },
}

/// Sending half of the event channel. Every log and error is mirrored to
/// `tracing`; a send with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "dicebot::game", "{message}");
        let _ = self.tx.send(GameEvent::Log(message));
    }

    pub fn error(&self, message: impl Into<String>, cause: Option<String>) {
        let message = message.into();
        match &cause {
            Some(c) => error!(target: "dicebot::game", cause = %c, "{message}"),
            None => error!(target: "dicebot::game", "{message}"),
        }
        let _ = self.tx.send(GameEvent::Error { message, cause });
    }

    pub fn state(&self, state: &GameState) {
        let _ = self.tx.send(GameEvent::State(state.clone()));
    }

    pub fn stopped(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(target: "dicebot::game", reason = %reason, "Game stopped");
        let _ = self.tx.send(GameEvent::Stopped { reason });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
