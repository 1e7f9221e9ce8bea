//! InstanceCoordinator - command-facing bridge between the registry and the
//! restart detector
//!
//! ## Responsibilities
//!
//! 1. **Commands** - `Add`, `Remove`, `GetInfo` arrive as [`Command`] envelopes
//! 2. **Subscriptions** - every database instance is watched by the [`RestartMonitor`]
//! 3. **Metadata** - database instances are probed and pushed to the control-plane
//!    on start, on add, and after every detected restart
//!
//! ## Error Policy
//!
//! The registry mutation itself reports failures faithfully. Secondary side
//! effects (subscription, probe, push) are logged and swallowed, so a flaky
//! database or control-plane never fails an otherwise successful catalog change.
//!
//! ```text
//!   Command ──▶ Coordinator ──▶ InstanceStore
//!                   │   ▲
//!        add/remove │   │ global restart feed
//!                   ▼   │
//!              RestartMonitor          resync task ──▶ probe ──▶ PUT <instances>/<uuid>
//! ```

pub mod messages;
mod resync;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::control_plane::ControlPlaneClient;
use crate::error::{InstanceError, InstanceResult};
use crate::instance::{InstanceRecord, InstanceStore};
use crate::probe::MetadataProbe;
use crate::restart::{RestartMonitor, RestartSubscription};
use crate::util::redact_dsn;

pub use messages::{Command, CommandKind, Reply};
pub use status::StatusBoard;

/// Anything that serves the command envelope protocol
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle exactly one command
    async fn handle(&self, cmd: Command) -> Reply;

    /// Latest status per sub-component
    async fn status(&self) -> HashMap<String, String>;
}

/// State shared between the coordinator and its resync task
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) store: Arc<InstanceStore>,
    pub(crate) probe: Arc<dyn MetadataProbe>,
    pub(crate) api: ControlPlaneClient,
    pub(crate) status: Arc<StatusBoard>,
}

impl Shared {
    /// Snapshot of every database instance in the registry
    pub(crate) async fn database_instances(&self) -> Vec<InstanceRecord> {
        self.store
            .list()
            .await
            .into_iter()
            .filter(InstanceRecord::is_database)
            .collect()
    }

    /// Probe live metadata into `record`
    pub(crate) async fn refresh(&self, record: &mut InstanceRecord) -> anyhow::Result<()> {
        let dsn = record
            .dsn()
            .ok_or_else(|| InstanceError::MissingDsn(record.uuid.clone()))?;

        let metadata = self
            .probe
            .probe(dsn)
            .await
            .with_context(|| format!("failed to get MySQL info for {}", redact_dsn(dsn)))?;

        metadata.apply_to(record);
        Ok(())
    }

    /// PUT the record to `<instances-link>/<uuid>`, expecting 200
    pub(crate) async fn push(&self, record: &InstanceRecord) -> anyhow::Result<()> {
        let url = self
            .api
            .instance_url(&record.uuid)
            .context("no instances API link")?;

        let data = serde_json::to_vec(record).context("failed to encode instance")?;
        let status = self.api.put(&url, data).await?;

        if status != StatusCode::OK {
            anyhow::bail!("PUT {url} returned {status}, expected 200");
        }

        debug!("pushed {} to {url}", record.uuid);
        Ok(())
    }
}

/// Keeps the registry, the restart subscriptions, and the control-plane's
/// view of every instance consistent
pub struct Coordinator {
    shared: Shared,

    monitor: RestartMonitor,

    /// Restart subscriptions of database instances, by UUID
    subscriptions: Mutex<HashMap<String, RestartSubscription>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<InstanceStore>,
        monitor: RestartMonitor,
        probe: Arc<dyn MetadataProbe>,
        api: ControlPlaneClient,
    ) -> Self {
        Self {
            shared: Shared {
                store,
                probe,
                api,
                status: Arc::new(StatusBoard::default()),
            },
            monitor,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &InstanceStore {
        &self.shared.store
    }

    /// Load the registry, watch and sync every database instance, and launch
    /// the resync task
    ///
    /// Only a registry load failure aborts the start; a single unreachable
    /// instance is logged and skipped. Returns the resync task's handle.
    #[instrument(skip(self))]
    pub async fn start(&self) -> InstanceResult<JoinHandle<()>> {
        let status = &self.shared.status;
        status.update(status::COORDINATOR, status::STARTING).await;

        self.shared.store.init().await?;
        info!("started");
        status.update(status::COORDINATOR, status::RUNNING).await;

        let feed = self.monitor.global_subscribe().await;

        for record in self.shared.database_instances().await {
            if let Err(e) = self.watch_and_sync(record.clone()).await {
                warn!("skipping instance {}: {e:#}", record.uuid);
            }
        }

        Ok(resync::spawn(self.shared.clone(), feed))
    }

    /// Nothing to stop; the restart monitor is stopped by its owner
    pub fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Every database instance currently in the registry
    pub async fn database_instances(&self) -> Vec<InstanceRecord> {
        self.shared.database_instances().await
    }

    /// Latest status per sub-component, including the registry's ids
    pub async fn status(&self) -> HashMap<String, String> {
        let ids = self.shared.store.ids().await;
        self.shared
            .status
            .update(status::REGISTRY, ids.join(" "))
            .await;
        self.shared.status.all().await
    }

    /// Handle one command; errors are returned inside the reply
    #[instrument(skip(self, cmd), fields(cmd = %cmd.cmd))]
    pub async fn handle(&self, cmd: Command) -> Reply {
        let status = &self.shared.status;
        status
            .update(status::COORDINATOR, format!("handling {}", cmd.cmd))
            .await;

        let reply = match self.dispatch(&cmd).await {
            Ok(data) => cmd.reply(data),
            Err(e) => {
                warn!("{} failed: {e}", cmd.cmd);
                cmd.reply_error(e)
            }
        };

        status.update(status::COORDINATOR, status::RUNNING).await;
        reply
    }

    async fn dispatch(&self, cmd: &Command) -> InstanceResult<Option<Vec<u8>>> {
        let kind: CommandKind = cmd.cmd.parse()?;

        let record: InstanceRecord = serde_json::from_slice(&cmd.data)
            .map_err(|e| InstanceError::json(format!("invalid {kind} payload"), e))?;

        match kind {
            CommandKind::Add => self.handle_add(record).await.map(|_| None),
            CommandKind::Remove => self.handle_remove(record).await.map(|_| None),
            CommandKind::GetInfo => self.handle_get_info(record).await.map(Some),
        }
    }

    async fn handle_add(&self, record: InstanceRecord) -> InstanceResult<()> {
        let uuid = record.uuid.clone();
        self.shared.store.add(record, true).await?;

        let stored = self.shared.store.get(&uuid).await?;
        if stored.is_database()
            && let Err(e) = self.watch_and_sync(stored).await
        {
            warn!("added {uuid}, but could not sync it: {e:#}");
        }

        Ok(())
    }

    async fn handle_remove(&self, record: InstanceRecord) -> InstanceResult<()> {
        let uuid = record.uuid;

        // local only, a remote record must not be cached just to be deleted
        if let Some(stored) = self.shared.store.peek(&uuid).await
            && stored.is_database()
        {
            self.unwatch(&uuid).await;
        }

        self.shared.store.remove(&uuid).await
    }

    async fn handle_get_info(&self, mut record: InstanceRecord) -> InstanceResult<Vec<u8>> {
        if !record.is_database() {
            return Err(InstanceError::NotDatabase(record.uuid));
        }
        if record.dsn().is_none() {
            return Err(InstanceError::MissingDsn(record.uuid));
        }

        self.shared
            .refresh(&mut record)
            .await
            .map_err(|e| InstanceError::Probe(format!("{e:#}")))?;

        serde_json::to_vec(&record)
            .map_err(|e| InstanceError::json(format!("could not encode instance {}", record.uuid), e))
    }

    /// Subscribe a database instance to restarts, then probe and push it
    ///
    /// The subscription is kept even when the probe or push fails.
    async fn watch_and_sync(&self, mut record: InstanceRecord) -> anyhow::Result<()> {
        let dsn = record
            .dsn()
            .ok_or_else(|| InstanceError::MissingDsn(record.uuid.clone()))?
            .to_string();

        let subscription = self
            .monitor
            .add(&dsn)
            .await
            .with_context(|| format!("cannot watch {}", redact_dsn(&dsn)))?;

        let previous = self
            .subscriptions
            .lock()
            .await
            .insert(record.uuid.clone(), subscription);
        if let Some(previous) = previous {
            self.monitor.unsubscribe(&previous).await;
        }

        self.shared.refresh(&mut record).await?;
        self.shared.push(&record).await?;

        info!("synced {} ({})", record.uuid, redact_dsn(&dsn));
        Ok(())
    }

    /// Drop the restart subscription of an instance, if it has one
    async fn unwatch(&self, uuid: &str) {
        let subscription = self.subscriptions.lock().await.remove(uuid);
        match subscription {
            Some(subscription) => self.monitor.unsubscribe(&subscription).await,
            None => debug!("{uuid} has no restart subscription"),
        }
    }
}

#[async_trait]
impl CommandHandler for Coordinator {
    async fn handle(&self, cmd: Command) -> Reply {
        Coordinator::handle(self, cmd).await
    }

    async fn status(&self) -> HashMap<String, String> {
        Coordinator::status(self).await
    }
}
