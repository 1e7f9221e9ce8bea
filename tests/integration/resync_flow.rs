//! Restart-driven resync of database instances
//!
//! These tests verify that:
//! - A detected restart re-probes and re-pushes the affected instances only
//! - Instances sharing a connection string are all refreshed
//! - A crash of the resync task is reported in the status map

use std::time::Duration;

use instance_agent::coordinator::status;
use instance_agent::instance::HOSTNAME_PROPERTY;
use instance_agent::{CommandKind, InstanceRecord};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use crate::helpers::*;

#[tokio::test]
async fn test_restart_triggers_resync() {
    let harness = Harness::new().await;
    harness.liveness.set_uptime(DSN, 3_600);
    harness.liveness.set_uptime(OTHER_DSN, 3_600);
    let _resync = harness.coordinator.start().await.unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(OTHER_DB_ID, OTHER_DSN))
        .await;
    harness.wait_for_puts(2).await;
    let probes_before = harness.probe.calls();

    harness.liveness.set_uptime(DSN, 5);
    assert_eq!(harness.monitor.check().await, vec![DSN.to_string()]);

    let puts = harness.wait_for_puts(3).await;
    let resynced = pushed_record(&puts[2]);
    assert_eq!(resynced.uuid, DB_ID);
    assert_eq!(resynced.property(HOSTNAME_PROPERTY), Some("db1.3306"));
    assert_eq!(harness.probe.calls(), probes_before + 1);

    harness.wait_for_status(status::RESYNC, status::IDLE).await;
}

#[tokio::test]
async fn test_restart_with_polling_task() {
    let harness = Harness::new().await;
    harness.liveness.set_uptime(DSN, 3_600);
    let _resync = harness.coordinator.start().await.unwrap();
    let poller = harness.monitor.start().unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness.wait_for_puts(1).await;

    harness.liveness.set_uptime(DSN, 5);
    let puts = harness.wait_for_puts(2).await;
    assert_eq!(pushed_record(&puts[1]).uuid, DB_ID);

    harness.monitor.stop();
    timeout(Duration::from_secs(5), poller)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shared_dsn_refreshes_every_instance() {
    let harness = Harness::new().await;
    harness.liveness.set_uptime(DSN, 3_600);
    let _resync = harness.coordinator.start().await.unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(OTHER_DB_ID, DSN))
        .await;
    harness.wait_for_puts(2).await;

    harness.liveness.set_uptime(DSN, 5);
    harness.monitor.check().await;

    let puts = harness.wait_for_puts(4).await;
    let mut resynced: Vec<_> = puts[2..]
        .iter()
        .map(|request| pushed_record(request).uuid)
        .collect();
    resynced.sort();

    let mut expected = vec![DB_ID.to_string(), OTHER_DB_ID.to_string()];
    expected.sort();
    assert_eq!(resynced, expected);
}

#[tokio::test]
async fn test_failed_push_does_not_stop_resync() {
    let harness = Harness::with_put_status(503).await;
    harness.liveness.set_uptime(DSN, 3_600);
    let _resync = harness.coordinator.start().await.unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness.wait_for_puts(1).await;

    for uptime in [30, 10] {
        harness.liveness.set_uptime(DSN, uptime);
        harness.monitor.check().await;
    }

    harness.wait_for_puts(3).await;
    harness.wait_for_status(status::RESYNC, status::IDLE).await;
}

#[tokio::test]
async fn test_removed_instance_is_not_resynced() {
    let harness = Harness::new().await;
    harness.liveness.set_uptime(DSN, 3_600);
    let _resync = harness.coordinator.start().await.unwrap();

    // another subscriber keeps the target watched after the removal
    let _external = harness.monitor.add(DSN).await.unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness
        .send(CommandKind::Remove, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness.wait_for_puts(1).await;
    let probes_before = harness.probe.calls();

    harness.liveness.set_uptime(DSN, 5);
    assert_eq!(harness.monitor.check().await, vec![DSN.to_string()]);

    // the resync task picked the target up and found nothing to refresh
    harness.wait_for_status(status::RESYNC, status::IDLE).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.probe.calls(), probes_before);
    assert_eq!(harness.puts().await.len(), 1);
}

#[tokio::test]
async fn test_resync_crash_is_reported() {
    let harness = Harness::new().await;
    harness.liveness.set_uptime(DSN, 3_600);
    let resync = harness.coordinator.start().await.unwrap();

    harness
        .send(CommandKind::Add, &InstanceRecord::mysql(DB_ID, DSN))
        .await;
    harness.wait_for_puts(1).await;

    harness.probe.set_panicking(true);
    harness.liveness.set_uptime(DSN, 5);
    harness.monitor.check().await;

    timeout(Duration::from_secs(5), resync)
        .await
        .unwrap()
        .unwrap();

    harness.wait_for_status(status::RESYNC, status::CRASHED).await;
    assert_eq!(harness.puts().await.len(), 1);
}
