//! Integration tests for project seeding and the operator asset commands.

mod common;

use appdistrib_core::config::{AppConfig, ProjectSeed};
use appdistrib_core::hash::keyed_digest;
use appdistrib_core::layout::asset_blob_path;
use appdistrib_metadata::repos::{AssetRepo, ProjectRepo};
use appdistrib_server::bootstrap::{ensure_project_seeds, hold_asset, release_asset};
use appdistrib_server::gc::sweep_orphan_assets;
use common::{TEST_ORGANIZATION, TEST_PROJECT, TestServer, asset_exists, seeded_bytes};

const SECRET: &[u8] = b"test-storage-secret";

fn seed(organization: &str, project: &str, historical: Option<u32>) -> ProjectSeed {
    ProjectSeed {
        organization: organization.to_string(),
        organization_name: None,
        project: project.to_string(),
        name: None,
        description: None,
        historical,
    }
}

#[tokio::test]
async fn test_seeds_create_and_reconcile_projects() {
    let server = TestServer::new().await;
    let metadata = server.metadata();

    let mut config = AppConfig::for_testing();
    config.projects = vec![
        seed(TEST_ORGANIZATION, TEST_PROJECT, Some(7)),
        seed("globex", "shuttle", None),
    ];
    ensure_project_seeds(metadata.as_ref(), &config).await.unwrap();
    // Seeding is idempotent.
    ensure_project_seeds(metadata.as_ref(), &config).await.unwrap();

    let existing = metadata
        .get_project(TEST_ORGANIZATION, TEST_PROJECT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.historical, 7);

    let created = metadata.get_project("globex", "shuttle").await.unwrap().unwrap();
    assert_eq!(
        created.historical,
        i64::from(config.retention.default_historical)
    );
    assert_eq!(created.name, "shuttle");
}

#[tokio::test]
async fn test_held_asset_survives_sweep_until_released() {
    let server = TestServer::new().await;
    server.set_historical(0).await;
    let metadata = server.metadata();

    // With nothing retained the build is pruned at once, orphaning its asset.
    let data = seeded_bytes(41, 24);
    let key_b64 = server.upload(&data, "app.zip", None, 24).await.1.unwrap();
    let key = keyed_digest(SECRET, &data).unwrap();
    assert!(metadata.is_orphan_asset(&key.to_hex()).await.unwrap());

    let held = hold_asset(metadata.as_ref(), &key_b64, TEST_ORGANIZATION, Some(TEST_PROJECT))
        .await
        .unwrap();
    assert_eq!(held, key.to_hex());

    let stats = sweep_orphan_assets(&server.state, 10).await.unwrap();
    assert_eq!(stats.items_deleted, 0);
    assert!(server.storage_root().join(asset_blob_path(&key)).exists());

    release_asset(metadata.as_ref(), &key.to_hex()).await.unwrap();
    let stats = sweep_orphan_assets(&server.state, 10).await.unwrap();
    assert_eq!(stats.items_deleted, 1);
    assert!(!asset_exists(metadata.as_ref(), &key.to_hex()).await);
    assert!(!server.storage_root().join(asset_blob_path(&key)).exists());
}

#[tokio::test]
async fn test_hold_rejects_unknown_targets() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let data = seeded_bytes(42, 24);
    server.upload(&data, "app.zip", None, 24).await.1.unwrap();
    let asset_id = keyed_digest(SECRET, &data).unwrap().to_hex();

    assert!(hold_asset(metadata.as_ref(), "not-a-key", TEST_ORGANIZATION, None)
        .await
        .is_err());
    assert!(hold_asset(metadata.as_ref(), &asset_id, "nobody", None).await.is_err());
    assert!(hold_asset(metadata.as_ref(), &asset_id, TEST_ORGANIZATION, Some("missing"))
        .await
        .is_err());

    let unknown = keyed_digest(SECRET, b"never uploaded").unwrap().to_hex();
    assert!(hold_asset(metadata.as_ref(), &unknown, TEST_ORGANIZATION, None)
        .await
        .is_err());
    assert!(release_asset(metadata.as_ref(), &unknown).await.is_err());

    // A held asset is no orphan even without builds.
    hold_asset(metadata.as_ref(), &asset_id, TEST_ORGANIZATION, None)
        .await
        .unwrap();
    let asset = metadata.get_asset(&asset_id).await.unwrap().unwrap();
    assert_eq!(asset.organization_id.as_deref(), Some(TEST_ORGANIZATION));
    assert!(asset.project_id.is_none());
}
