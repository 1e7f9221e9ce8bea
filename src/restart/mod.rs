//! Restart detection for monitored database servers
//!
//! A database server that restarts may come back with a different version,
//! configuration, or hostname, so cached metadata has to be refreshed. The
//! [`RestartMonitor`](monitor::RestartMonitor) polls every watched server once
//! a second, compares its [`Fingerprint`] with the last one it saw, and fans
//! a restart signal out to all subscribers of that server.
//!
//! ```text
//!                    ┌──────────────────┐
//!   tick (1s) ──────▶│  RestartMonitor  │◀── add / remove (per-target subscriptions)
//!                    └────────┬─────────┘
//!                             │ uptime went back
//!              ┌──────────────┼───────────────┐
//!              ▼              ▼               ▼
//!        subscriber 1   subscriber N     global feed (target key)
//! ```
//!
//! Delivery is non-blocking: a subscriber whose buffer is full misses that
//! signal. Subscribers must treat "no signal" as "possibly missed".

pub mod monitor;
pub mod subscribers;

use async_trait::async_trait;

pub use monitor::{RestartMonitor, RestartSubscription};

/// Liveness marker of a server: how long its process has been up
///
/// Uptime only grows while the same process runs, so a reading below the
/// previous one means the server restarted in between. Nothing here reads the
/// agent's own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Seconds since the server process started
    pub uptime_secs: i64,
}

impl Fingerprint {
    pub fn from_uptime(uptime_secs: i64) -> Self {
        Self { uptime_secs }
    }

    /// Whether the server restarted between `previous` and `self`
    pub fn restarted_since(&self, previous: &Fingerprint) -> bool {
        self.uptime_secs < previous.uptime_secs
    }
}

/// Source of liveness fingerprints, keyed by connection string
#[async_trait]
pub trait LivenessSource: Send + Sync {
    /// Read the current fingerprint of the server behind `target`
    async fn fingerprint(&self, target: &str) -> anyhow::Result<Fingerprint>;
}
