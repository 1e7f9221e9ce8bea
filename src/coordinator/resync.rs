//! Resync task - refreshes database instances after a restart
//!
//! The task consumes the restart monitor's global feed one target at a time,
//! in receipt order. For each target it re-probes every database instance with
//! that connection string and pushes the result to the control-plane.
//!
//! The loop runs in its own task under a small supervisor. A panic inside the
//! loop marks the resync status `crashed` and ends supervision; relaunching
//! is up to the caller.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Shared;
use super::status::{CRASHED, IDLE, RESYNC, STOPPED};
use crate::util::redact_dsn;

/// Spawn the supervised resync loop and return the supervisor's handle
pub(crate) fn spawn(shared: Shared, feed: mpsc::Receiver<String>) -> JoinHandle<()> {
    let status = shared.status.clone();
    let worker = tokio::spawn(run(shared, feed));

    tokio::spawn(async move {
        match worker.await {
            Ok(()) => {
                info!("restart feed closed, resync stopped");
                status.update(RESYNC, STOPPED).await;
            }
            Err(e) if e.is_panic() => {
                error!("resync task crashed: {e}");
                status.update(RESYNC, CRASHED).await;
            }
            Err(e) => {
                warn!("resync task cancelled: {e}");
                status.update(RESYNC, STOPPED).await;
            }
        }
    })
}

async fn run(shared: Shared, mut feed: mpsc::Receiver<String>) {
    debug!("starting resync task");

    loop {
        shared.status.update(RESYNC, IDLE).await;

        let Some(target) = feed.recv().await else {
            break;
        };

        resync(&shared, &target).await;
    }
}

/// Refresh and push every database instance whose connection string is `target`
async fn resync(shared: &Shared, target: &str) {
    let safe_target = redact_dsn(target);
    debug!("restart of {safe_target}");
    shared
        .status
        .update(RESYNC, format!("updating {safe_target}"))
        .await;

    // the registry may have changed since the subscription was made
    let matches: Vec<_> = shared
        .database_instances()
        .await
        .into_iter()
        .filter(|record| record.dsn() == Some(target))
        .collect();

    if matches.len() > 1 {
        let ids: Vec<_> = matches.iter().map(|record| record.uuid.as_str()).collect();
        warn!(
            "{safe_target} is shared by {} instances ({}), refreshing all of them",
            matches.len(),
            ids.join(", ")
        );
    }

    for mut record in matches {
        shared
            .status
            .update(RESYNC, format!("getting info {safe_target}"))
            .await;
        if let Err(e) = shared.refresh(&mut record).await {
            warn!("{e:#}");
            continue;
        }

        shared
            .status
            .update(RESYNC, format!("updating info {safe_target}"))
            .await;
        if let Err(e) = shared.push(&record).await {
            warn!("failed to push {}: {e:#}", record.uuid);
            continue;
        }

        info!("resynced {} after restart of {safe_target}", record.uuid);
    }
}
