//! Restart detection with the polling task running
//!
//! These tests verify that:
//! - A restart reaches every subscriber of the target and the global feed
//! - Unreachable targets do not stall the others
//! - Stopping is idempotent and ends the polling task

use std::sync::Arc;
use std::time::Duration;

use instance_agent::RestartMonitor;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use crate::helpers::*;

const WAIT: Duration = Duration::from_secs(5);

fn monitor(liveness: &Arc<FakeLiveness>) -> RestartMonitor {
    RestartMonitor::with_poll_interval(liveness.clone(), Duration::from_millis(20))
}

#[tokio::test]
async fn test_restart_reaches_all_subscribers() {
    let liveness = Arc::new(FakeLiveness::default());
    liveness.set_uptime(DSN, 3_600);
    liveness.set_uptime(OTHER_DSN, 3_600);

    let monitor = monitor(&liveness);
    let mut feed = monitor.global_subscribe().await;
    let mut first = monitor.add(DSN).await.unwrap();
    let mut second = monitor.add(DSN).await.unwrap();
    let mut bystander = monitor.add(OTHER_DSN).await.unwrap();

    let task = monitor.start().unwrap();

    liveness.set_uptime(DSN, 5);

    timeout(WAIT, first.recv()).await.unwrap().unwrap();
    timeout(WAIT, second.recv()).await.unwrap().unwrap();
    let restarted = timeout(WAIT, feed.recv()).await.unwrap().unwrap();
    assert_eq!(restarted, DSN);

    assert!(bystander.try_recv().is_none());

    monitor.stop();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreachable_target_does_not_block_others() {
    let liveness = Arc::new(FakeLiveness::default());
    liveness.set_uptime(DSN, 3_600);
    liveness.set_uptime(OTHER_DSN, 3_600);

    let monitor = monitor(&liveness);
    let mut feed = monitor.global_subscribe().await;
    let _down = monitor.add(DSN).await.unwrap();
    let mut up = monitor.add(OTHER_DSN).await.unwrap();

    let task = monitor.start().unwrap();

    liveness.set_unreachable(DSN);
    liveness.set_uptime(OTHER_DSN, 5);

    timeout(WAIT, up.recv()).await.unwrap().unwrap();
    assert_eq!(timeout(WAIT, feed.recv()).await.unwrap().unwrap(), OTHER_DSN);

    // still watched, just not reachable
    assert_eq!(monitor.subscriber_count(DSN).await, 1);

    monitor.stop();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreachable_target_cannot_be_subscribed() {
    let liveness = Arc::new(FakeLiveness::default());
    let monitor = monitor(&liveness);

    assert!(monitor.add(DSN).await.is_err());
    assert!(monitor.watched().await.is_empty());
}

#[tokio::test]
async fn test_slow_subscriber_keeps_one_pending_signal() {
    let liveness = Arc::new(FakeLiveness::default());
    liveness.set_uptime(DSN, 3_600);

    let monitor = monitor(&liveness);
    let mut subscription = monitor.add(DSN).await.unwrap();

    for uptime in [30, 20, 10] {
        liveness.set_uptime(DSN, uptime);
        assert_eq!(monitor.check().await, vec![DSN.to_string()]);
    }

    assert!(subscription.try_recv().is_some());
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let liveness = Arc::new(FakeLiveness::default());
    let monitor = monitor(&liveness);

    let task = monitor.start().unwrap();
    monitor.stop();
    monitor.stop();
    timeout(WAIT, task).await.unwrap().unwrap();

    // the task is gone, stopping again must not block or panic
    monitor.stop();
    assert!(monitor.start().is_err());
}
