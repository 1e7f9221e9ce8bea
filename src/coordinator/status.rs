//! Latest status string per coordinator sub-component

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::trace;

/// Overall coordinator status
pub const COORDINATOR: &str = "instance";
/// Registry contents
pub const REGISTRY: &str = "instance-repo";
/// Resync task status
pub const RESYNC: &str = "instance-mrms";

pub const STARTING: &str = "starting";
pub const RUNNING: &str = "running";
pub const IDLE: &str = "idle";
pub const CRASHED: &str = "crashed";
pub const STOPPED: &str = "stopped";

/// Shared status store
#[derive(Debug)]
pub struct StatusBoard {
    statuses: RwLock<HashMap<String, String>>,
}

impl StatusBoard {
    /// Create a board with an empty status for each component
    pub fn new(components: &[&str]) -> Self {
        Self {
            statuses: RwLock::new(
                components
                    .iter()
                    .map(|component| (component.to_string(), String::new()))
                    .collect(),
            ),
        }
    }

    pub async fn update(&self, component: &str, status: impl Into<String>) {
        let status = status.into();
        trace!("{component}: {status}");
        self.statuses
            .write()
            .await
            .insert(component.to_string(), status);
    }

    pub async fn get(&self, component: &str) -> Option<String> {
        self.statuses.read().await.get(component).cloned()
    }

    /// Snapshot of all statuses
    pub async fn all(&self) -> HashMap<String, String> {
        self.statuses.read().await.clone()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(&[COORDINATOR, REGISTRY, RESYNC])
    }
}
