//! RestartMonitor - polls watched servers and signals restarts
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → fingerprint(target) → uptime went back? → notify subscribers → send target to global feeds
//!     ↑
//!     └─── stop signal (capacity one, non-blocking)
//! ```
//!
//! A target is watched exactly as long as it has at least one subscription.
//! Polling failures for one target are logged and never affect other targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use super::subscribers::{RestartSignal, Subscribers};
use super::{Fingerprint, LivenessSource};
use crate::util::redact_dsn;

/// Interval between two liveness checks
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Buffer of each global feed; enough for a burst of restarts across many targets
pub const GLOBAL_FEED_BUFFER: usize = 100;

/// A caller's subscription to restarts of one target
#[derive(Debug)]
pub struct RestartSubscription {
    id: u64,
    target: String,
    receiver: mpsc::Receiver<RestartSignal>,
}

impl RestartSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wait for the next restart signal; `None` once the subscription was removed
    pub async fn recv(&mut self) -> Option<RestartSignal> {
        self.receiver.recv().await
    }

    /// Take a pending restart signal without waiting
    pub fn try_recv(&mut self) -> Option<RestartSignal> {
        self.receiver.try_recv().ok()
    }
}

struct WatchedTarget {
    baseline: Fingerprint,
    subscribers: Subscribers,
}

#[derive(Default)]
struct Table {
    targets: HashMap<String, WatchedTarget>,
    global: Vec<mpsc::Sender<String>>,
}

struct Inner {
    source: Arc<dyn LivenessSource>,
    table: Mutex<Table>,
    next_id: AtomicU64,
    poll_interval: Duration,
    stop_tx: mpsc::Sender<()>,
    stop_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

/// Background poller detecting restarts of watched targets
///
/// Cheap to clone; clones share the watch set and the polling task.
#[derive(Clone)]
pub struct RestartMonitor {
    inner: Arc<Inner>,
}

impl RestartMonitor {
    pub fn new(source: Arc<dyn LivenessSource>) -> Self {
        Self::with_poll_interval(source, POLL_INTERVAL)
    }

    /// Create a monitor polling at a custom interval
    pub fn with_poll_interval(source: Arc<dyn LivenessSource>, poll_interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);

        Self {
            inner: Arc::new(Inner {
                source,
                table: Mutex::new(Table::default()),
                next_id: AtomicU64::new(1),
                poll_interval,
                stop_tx,
                stop_rx: std::sync::Mutex::new(Some(stop_rx)),
            }),
        }
    }

    /// Launch the polling task
    ///
    /// The task checks immediately, then once per interval, until [`stop`](Self::stop)
    /// is called. A monitor can only be started once.
    pub fn start(&self) -> anyhow::Result<JoinHandle<()>> {
        let mut stop_rx = self
            .inner
            .stop_rx
            .lock()
            .map_err(|_| anyhow::anyhow!("restart monitor state poisoned"))?
            .take()
            .ok_or_else(|| anyhow::anyhow!("restart monitor already started"))?;

        let monitor = self.clone();
        let poll_interval = self.inner.poll_interval;

        Ok(tokio::spawn(async move {
            debug!("starting restart monitor");

            monitor.check().await;

            let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check().await;
                    }

                    _ = stop_rx.recv() => {
                        debug!("received stop signal");
                        break;
                    }
                }
            }

            debug!("restart monitor stopped");
        }))
    }

    /// Ask the polling task to stop
    ///
    /// Never blocks and may be called any number of times, also after the
    /// task exited. The task may still be running when this returns.
    pub fn stop(&self) {
        match self.inner.stop_tx.try_send(()) {
            Ok(()) => trace!("stop signal posted"),
            Err(TrySendError::Full(_)) => trace!("stop signal already pending"),
            Err(TrySendError::Closed(_)) => trace!("polling task already gone"),
        }
    }

    /// Subscribe to restarts of `target`
    ///
    /// The first subscription for a target reads its baseline fingerprint; if
    /// that fails (e.g. the server is unreachable) nothing is registered.
    #[instrument(skip(self, target), fields(target = %redact_dsn(target)))]
    pub async fn add(&self, target: &str) -> anyhow::Result<RestartSubscription> {
        let mut table = self.inner.table.lock().await;

        if !table.targets.contains_key(target) {
            let baseline = self.inner.source.fingerprint(target).await?;
            debug!("watching target, up for {}s", baseline.uptime_secs);
            table.targets.insert(
                target.to_string(),
                WatchedTarget {
                    baseline,
                    subscribers: Subscribers::new(),
                },
            );
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let watched = table
            .targets
            .get_mut(target)
            .ok_or_else(|| anyhow::anyhow!("target vanished while subscribing"))?;
        let receiver = watched.subscribers.add(id);

        trace!("added subscriber {id}");
        Ok(RestartSubscription {
            id,
            target: target.to_string(),
            receiver,
        })
    }

    /// Drop subscription `id` of `target`; the last one unwatches the target
    #[instrument(skip(self, target), fields(target = %redact_dsn(target)))]
    pub async fn remove(&self, target: &str, id: u64) {
        let mut table = self.inner.table.lock().await;

        let Some(watched) = table.targets.get_mut(target) else {
            trace!("target not watched");
            return;
        };

        if !watched.subscribers.remove(id) {
            trace!("subscriber {id} not found");
        }

        if watched.subscribers.is_empty() {
            table.targets.remove(target);
            debug!("no subscribers left, target unwatched");
        }
    }

    /// Convenience wrapper around [`remove`](Self::remove)
    pub async fn unsubscribe(&self, subscription: &RestartSubscription) {
        self.remove(&subscription.target, subscription.id).await;
    }

    /// Open a feed receiving the key of every target that restarts
    pub async fn global_subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(GLOBAL_FEED_BUFFER);
        self.inner.table.lock().await.global.push(tx);
        rx
    }

    /// Check every watched target once
    ///
    /// Returns the targets found restarted.
    #[instrument(skip(self))]
    pub async fn check(&self) -> Vec<String> {
        let mut table = self.inner.table.lock().await;
        let Table { targets, global } = &mut *table;

        let mut restarted = vec![];
        for (target, watched) in targets.iter_mut() {
            let current = match self.inner.source.fingerprint(target).await {
                Ok(current) => current,
                Err(e) => {
                    warn!("liveness check for {} failed: {e:#}", redact_dsn(target));
                    continue;
                }
            };

            // every reading moves the baseline, so uptime is compared tick to tick
            let previous = std::mem::replace(&mut watched.baseline, current);
            if !current.restarted_since(&previous) {
                continue;
            }

            info!(
                "{} restarted (uptime {}s -> {}s)",
                redact_dsn(target),
                previous.uptime_secs,
                current.uptime_secs
            );

            let delivered = watched.subscribers.notify();
            trace!(
                "restart delivered to {delivered}/{} subscribers",
                watched.subscribers.len()
            );

            global.retain(|feed| match feed.try_send(target.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("global restart feed is full, dropping {}", redact_dsn(target));
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });

            restarted.push(target.clone());
        }

        restarted
    }

    /// Targets currently polled
    pub async fn watched(&self) -> Vec<String> {
        self.inner.table.lock().await.targets.keys().cloned().collect()
    }

    /// Number of subscriptions for `target`
    pub async fn subscriber_count(&self, target: &str) -> usize {
        self.inner
            .table
            .lock()
            .await
            .targets
            .get(target)
            .map_or(0, |watched| watched.subscribers.len())
    }
}
