//! Subscriber set for a single watched target

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Buffer of each subscriber channel; a second signal while one is pending is dropped
pub const SUBSCRIBER_BUFFER: usize = 1;

/// Signal delivered to per-target subscribers when the target restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSignal;

/// Delivery channels interested in one target, keyed by subscription id
#[derive(Debug, Default)]
pub struct Subscribers {
    channels: Vec<(u64, mpsc::Sender<RestartSignal>)>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new channel under `id` and return its receiving end
    pub fn add(&mut self, id: u64) -> mpsc::Receiver<RestartSignal> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.channels.push((id, tx));
        rx
    }

    /// Drop the channel registered under `id`; returns whether it existed
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.channels.len();
        self.channels.retain(|(channel_id, _)| *channel_id != id);
        self.channels.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Send a restart signal to every subscriber without waiting
    ///
    /// Returns how many subscribers received it.
    pub fn notify(&self) -> usize {
        let mut delivered = 0;
        for (id, tx) in &self.channels {
            match tx.try_send(RestartSignal) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!("subscriber {id} has a pending signal, dropping this one")
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("subscriber {id} dropped its receiver without unsubscribing")
                }
            }
        }
        delivered
    }
}
