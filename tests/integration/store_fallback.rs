//! Registry persistence and control-plane fallback across restarts
//!
//! These tests verify that:
//! - Records survive a restart of the agent
//! - Records resolved through the control-plane are cached durably
//! - Concurrent lookups of the same unknown id hit the control-plane once

use std::sync::Arc;

use assert_matches::assert_matches;
use instance_agent::control_plane::API_KEY_HEADER;
use instance_agent::{InstanceError, InstanceRecord, InstanceStore};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_records_survive_restart() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    {
        let store = InstanceStore::new(dir.path(), control_plane(&server));
        store.init().await.unwrap();
        store
            .add(InstanceRecord::mysql(DB_ID, DSN), true)
            .await
            .unwrap();
        store
            .add(InstanceRecord::os(OS_ID, "host1"), true)
            .await
            .unwrap();
        // not persisted, gone after restart
        store
            .add(InstanceRecord::mysql(OTHER_DB_ID, OTHER_DSN), false)
            .await
            .unwrap();
    }

    let store = InstanceStore::new(dir.path(), control_plane(&server));
    store.init().await.unwrap();

    let mut ids = store.ids().await;
    ids.sort();
    let mut expected = vec![DB_ID.to_string(), OS_ID.to_string()];
    expected.sort();
    assert_eq!(ids, expected);

    let record = store.get(DB_ID).await.unwrap();
    assert_eq!(record, InstanceRecord::mysql(DB_ID, DSN));
}

#[tokio::test]
async fn test_remote_record_is_cached_durably() {
    let server = MockServer::start().await;
    let remote = InstanceRecord::mysql(DB_ID, DSN);

    Mock::given(method("GET"))
        .and(path(format!("/instances/{DB_ID}")))
        .and(header(API_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = InstanceStore::new(dir.path(), control_plane(&server));
    store.init().await.unwrap();

    assert_eq!(store.get(DB_ID).await.unwrap(), remote);
    // served locally from now on
    assert_eq!(store.get(DB_ID).await.unwrap(), remote);
    assert!(store.file_path(DB_ID).exists());

    let restarted = InstanceStore::new(dir.path(), control_plane(&server));
    restarted.init().await.unwrap();
    assert_eq!(restarted.ids().await, vec![DB_ID.to_string()]);
}

#[tokio::test]
async fn test_concurrent_lookups_fetch_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/instances/{DB_ID}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(InstanceRecord::mysql(DB_ID, DSN))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(InstanceStore::new(dir.path(), control_plane(&server)));

    let lookups: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.get(DB_ID).await })
        })
        .collect();

    for lookup in lookups {
        let record = lookup.await.unwrap().unwrap();
        assert_eq!(record.uuid, DB_ID);
    }
}

#[tokio::test]
async fn test_removed_record_stays_removed() {
    let server = MockServer::start().await;

    // the control-plane does not know it either
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    {
        let store = InstanceStore::new(dir.path(), control_plane(&server));
        store
            .add(InstanceRecord::mysql(DB_ID, DSN), true)
            .await
            .unwrap();
        store.remove(DB_ID).await.unwrap();
    }

    let store = InstanceStore::new(dir.path(), control_plane(&server));
    store.init().await.unwrap();

    assert!(store.ids().await.is_empty());
    assert_matches!(
        store.get(DB_ID).await,
        Err(InstanceError::UnknownInstance(id)) if id == DB_ID
    );
}
