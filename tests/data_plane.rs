//! End-to-end tests for the assembled data plane: store, codec, queues,
//! workers, and file backing store wired together the way the daemon
//! wires them.

use keyplane::adapters::MockClusterClient;
use keyplane::crypto::generate_root_key;
use keyplane::domain::BackingStoreKind;
use keyplane::{AppConfig, DataPlane, SecretRecord};
use std::sync::Arc;
use std::time::Duration;

fn file_config(data_dir: &std::path::Path) -> Arc<AppConfig> {
    let mut config = AppConfig::default();
    config.store.backing_store = BackingStoreKind::File;
    config.store.data_dir = data_dir.to_path_buf();
    Arc::new(config)
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test]
async fn secret_lands_on_disk_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key_material = generate_root_key().unwrap().combine();

    {
        let plane = DataPlane::start(file_config(dir.path()), None).unwrap();
        plane.root_key().set(&key_material);

        plane
            .store()
            .upsert(SecretRecord::new("db-pass", vec!["s3cr3t".to_string()]), false)
            .await
            .unwrap();

        let primary = dir.path().join("db-pass.vault");
        eventually("secret file on disk", || primary.exists()).await;

        // shutdown drains the queues before the workers exit
        plane.shutdown().await;
    }

    // A restarted plane with the same root key serves the secret from disk.
    let plane = DataPlane::start(file_config(dir.path()), None).unwrap();
    plane.root_key().set(&key_material);

    let record = plane.store().read("db-pass").await.expect("secret should hydrate from disk");
    assert_eq!(record.values, vec!["s3cr3t"]);
    assert!(record.value_transformed.contains("s3cr3t"));

    plane.shutdown().await;
}

#[tokio::test]
async fn upsert_without_root_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let plane = DataPlane::start(file_config(dir.path()), None).unwrap();

    let result =
        plane.store().upsert(SecretRecord::new("too-early", vec!["v".to_string()]), false).await;
    assert!(result.is_err());
    assert!(plane.store().read("too-early").await.is_none());

    plane.shutdown().await;
}

#[tokio::test]
async fn delete_removes_the_file_asynchronously() {
    let dir = tempfile::tempdir().unwrap();
    let plane = DataPlane::start(file_config(dir.path()), None).unwrap();
    plane.root_key().set(&generate_root_key().unwrap().combine());

    let record = SecretRecord::new("doomed", vec!["v".to_string()]);
    plane.store().upsert(record.clone(), false).await.unwrap();

    let primary = dir.path().join("doomed.vault");
    eventually("secret file on disk", || primary.exists()).await;

    plane.store().delete(record).await.unwrap();
    assert!(plane.store().read("doomed").await.is_none());
    eventually("secret file removed", || !primary.exists()).await;

    plane.shutdown().await;
}

#[tokio::test]
async fn mirror_prefixed_secret_reaches_the_cluster_store() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClusterClient::new());
    let plane = DataPlane::start(file_config(dir.path()), Some(client.clone())).unwrap();
    plane.root_key().set(&generate_root_key().unwrap().combine());

    plane
        .store()
        .upsert(
            SecretRecord::new("cluster:api-token", vec![r#"{"token":"t-123"}"#.to_string()]),
            false,
        )
        .await
        .unwrap();

    eventually("cluster object created", || client.object("default", "api-token").is_some()).await;
    let object = client.object("default", "api-token").unwrap();
    assert_eq!(object.get("token"), Some(&b"t-123".to_vec()));

    plane.shutdown().await;
}

#[tokio::test]
async fn value_roundtrip_through_the_codec() {
    let dir = tempfile::tempdir().unwrap();
    let plane = DataPlane::start(file_config(dir.path()), None).unwrap();
    plane.root_key().set(&generate_root_key().unwrap().combine());

    let encrypted = plane.codec().encrypt_value("api-key-42").unwrap();
    assert_ne!(encrypted, "api-key-42");
    assert_eq!(plane.codec().decrypt_value(&encrypted).unwrap(), "api-key-42");

    plane.shutdown().await;
}

#[tokio::test]
async fn status_reports_counts_and_queues() {
    let dir = tempfile::tempdir().unwrap();
    let plane = DataPlane::start(file_config(dir.path()), None).unwrap();
    plane.root_key().set(&generate_root_key().unwrap().combine());

    plane
        .store()
        .upsert(SecretRecord::new("one", vec!["v".to_string()]), false)
        .await
        .unwrap();

    let status = plane.store().status();
    assert_eq!(status.num_secrets, 1);
    let names: Vec<&str> = status.queues.iter().map(|q| q.name.as_str()).collect();
    assert!(names.contains(&"upsert"));
    assert!(names.contains(&"delete"));
    assert!(names.contains(&"cluster-upsert"));
    assert!(names.contains(&"cluster-delete"));

    plane.shutdown().await;
}
