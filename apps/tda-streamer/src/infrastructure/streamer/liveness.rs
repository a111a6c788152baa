//! Connection Liveness
//!
//! Tracks when the last inbound frame arrived. The streamer sends periodic
//! `notify` heartbeats, so any long silence means the socket is dead even
//! if TCP has not noticed yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Watchdog timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often the watchdog checks.
    pub check_interval: Duration,
    /// Silence after which the connection is considered lost.
    pub stale_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }
}

impl LivenessConfig {
    /// Derive a check interval from the staleness threshold.
    #[must_use]
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            check_interval: (stale_after / 6).max(Duration::from_millis(10)),
            stale_after,
        }
    }
}

/// Inbound frame bookkeeping for the current connection.
#[derive(Debug)]
pub struct LivenessState {
    last_frame: RwLock<Instant>,
    frames: AtomicU64,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Start tracking from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
            frames: AtomicU64::new(0),
        }
    }

    /// Note that a frame arrived.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last frame (or since the last reset).
    #[must_use]
    pub fn time_since_frame(&self) -> Duration {
        self.last_frame.read().elapsed()
    }

    /// Whether the silence exceeds `stale_after`.
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.time_since_frame() > stale_after
    }

    /// Frames seen since the last reset.
    #[must_use]
    pub fn frames_seen(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Restart tracking for a new connection.
    pub fn reset(&self) {
        *self.last_frame.write() = Instant::now();
        self.frames.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_live() {
        let state = LivenessState::new();
        assert!(!state.is_stale(Duration::from_secs(1)));
        assert_eq!(state.frames_seen(), 0);
    }

    #[test]
    fn silence_goes_stale() {
        let state = LivenessState::new();
        *state.last_frame.write() = Instant::now()
            .checked_sub(Duration::from_millis(200))
            .unwrap();
        assert!(state.is_stale(Duration::from_millis(100)));

        state.record_frame();
        assert!(!state.is_stale(Duration::from_millis(100)));
        assert_eq!(state.frames_seen(), 1);

        state.reset();
        assert_eq!(state.frames_seen(), 0);
    }

    #[test]
    fn check_interval_follows_threshold() {
        let config = LivenessConfig::with_stale_after(Duration::from_secs(30));
        assert_eq!(config.check_interval, Duration::from_secs(5));
        let tiny = LivenessConfig::with_stale_after(Duration::from_millis(12));
        assert_eq!(tiny.check_interval, Duration::from_millis(10));
    }
}
