//! Integration tests for manifest publishing.

mod common;

use appdistrib_core::hash::keyed_digest;
use appdistrib_core::layout::{
    asset_blob_path, build_manifest_path, changelog_path, project_manifest_path,
};
use appdistrib_core::BuildId;
use appdistrib_metadata::repos::BuildRepo;
use appdistrib_server::ManifestPublisher;
use common::{
    TEST_ORGANIZATION, TEST_PROJECT, TestServer, build_ids, footer_for, header_for, seeded_bytes,
    upload_events,
};
use serde_json::Value;

const SECRET: &[u8] = b"test-storage-secret";

fn id(n: u64) -> BuildId {
    BuildId::new(n).unwrap()
}

async fn regenerate(server: &TestServer) -> usize {
    let session = server.session().await;
    ManifestPublisher::new(&server.state)
        .regenerate_project(&session.scope().organization, &session.scope().project)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_project_manifest_shape() {
    let server = TestServer::new().await;
    server.upload(&seeded_bytes(1, 16), "a.zip", Some(2), 16).await.1.unwrap();
    server.upload(&seeded_bytes(2, 16), "b.zip", Some(9), 16).await.1.unwrap();
    server.upload(&seeded_bytes(3, 16), "c.zip", Some(5), 16).await.1.unwrap();

    let raw = server
        .read_document(&project_manifest_path(TEST_ORGANIZATION, TEST_PROJECT))
        .unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("{\n  \""), "not pretty printed: {text}");

    let doc: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["organization"]["name"], "Acme");
    assert_eq!(doc["project"]["description"], "Test project");
    let builds = doc["builds"].as_array().unwrap();
    let ids: Vec<u64> = builds.iter().map(|b| b["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![9, 5, 2]);
    assert!(builds.iter().all(|b| b["createdAt"].as_i64().unwrap() > 0));
}

#[tokio::test]
async fn test_regenerate_is_idempotent() {
    let server = TestServer::new().await;
    let data = seeded_bytes(4, 32);
    let mut header = header_for(&data, "app.zip", None);
    header.changelog = Some("first".to_string());
    server
        .run(upload_events(header, &data, 32, footer_for(&data)))
        .await
        .1
        .unwrap();

    let build_path = build_manifest_path(TEST_ORGANIZATION, TEST_PROJECT, id(1));
    let project_path = project_manifest_path(TEST_ORGANIZATION, TEST_PROJECT);
    let log_path = changelog_path(TEST_ORGANIZATION, TEST_PROJECT, id(1));
    let before = (
        server.read_document(&build_path).unwrap(),
        server.read_document(&project_path).unwrap(),
    );

    std::fs::remove_file(server.storage_root().join(&build_path)).unwrap();
    std::fs::remove_file(server.storage_root().join(&log_path)).unwrap();

    assert_eq!(regenerate(&server).await, 1);
    assert_eq!(regenerate(&server).await, 1);
    assert_eq!(server.read_document(&build_path).unwrap(), before.0);
    assert_eq!(server.read_document(&project_path).unwrap(), before.1);
    assert_eq!(server.read_document(&log_path).unwrap(), b"first");
}

#[tokio::test]
async fn test_builds_with_missing_blob_are_healed() {
    let server = TestServer::new().await;
    let lost = seeded_bytes(7, 32);
    server.upload(&lost, "lost.zip", None, 32).await.1.unwrap();
    server.upload(&seeded_bytes(8, 32), "fine.zip", None, 32).await.1.unwrap();

    let key = keyed_digest(SECRET, &lost).unwrap();
    std::fs::remove_file(server.storage_root().join(asset_blob_path(&key))).unwrap();

    assert_eq!(regenerate(&server).await, 1);
    assert_eq!(
        build_ids(server.metadata().as_ref(), TEST_ORGANIZATION, TEST_PROJECT).await,
        vec![2]
    );
    assert!(server
        .read_document(&build_manifest_path(TEST_ORGANIZATION, TEST_PROJECT, id(1)))
        .is_none());
}

#[tokio::test]
async fn test_builds_without_asset_are_healed() {
    let server = TestServer::new().await;
    let lost = seeded_bytes(5, 32);
    server.upload(&lost, "lost.zip", None, 32).await.1.unwrap();
    server.upload(&seeded_bytes(6, 32), "fine.zip", None, 32).await.1.unwrap();

    let key = keyed_digest(SECRET, &lost).unwrap();
    sqlx::query("DELETE FROM assets WHERE asset_id = ?")
        .bind(key.to_hex())
        .execute(server.pool())
        .await
        .unwrap();
    let row = server
        .metadata()
        .get_build(TEST_ORGANIZATION, TEST_PROJECT, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(row.asset_id.is_none());

    assert_eq!(regenerate(&server).await, 1);

    assert_eq!(
        build_ids(server.metadata().as_ref(), TEST_ORGANIZATION, TEST_PROJECT).await,
        vec![2]
    );
    assert!(server
        .read_document(&build_manifest_path(TEST_ORGANIZATION, TEST_PROJECT, id(1)))
        .is_none());
    let doc: Value = serde_json::from_slice(
        &server
            .read_document(&project_manifest_path(TEST_ORGANIZATION, TEST_PROJECT))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(doc["builds"].as_array().unwrap().len(), 1);
    assert_eq!(doc["builds"][0]["id"], 2);
}

#[tokio::test]
async fn test_render_skips_builds_without_asset() {
    let server = TestServer::new().await;
    server.upload(&seeded_bytes(7, 8), "a.zip", None, 8).await.1.unwrap();

    let mut build = server
        .metadata()
        .list_builds_with_assets(TEST_ORGANIZATION, TEST_PROJECT)
        .await
        .unwrap()
        .remove(0);
    let publisher = ManifestPublisher::new(&server.state);
    assert!(publisher.render_build_manifest(&build).unwrap().is_some());

    build.filename = None;
    assert!(publisher.render_build_manifest(&build).unwrap().is_none());
}

#[tokio::test]
async fn test_public_path_prefix_is_configurable() {
    let server = TestServer::with_config(|config| {
        config.server.public_path_prefix = "/files/".to_string();
    })
    .await;
    let data = seeded_bytes(8, 8);
    server.upload(&data, "a.zip", None, 8).await.1.unwrap();

    let doc: Value = serde_json::from_slice(
        &server
            .read_document(&build_manifest_path(TEST_ORGANIZATION, TEST_PROJECT, id(1)))
            .unwrap(),
    )
    .unwrap();
    let path = doc["path"].as_str().unwrap();
    assert!(path.starts_with("/files/assets/"), "{path}");
    assert!(path.ends_with("/a.zip"));
}
