use actix_web::{http::StatusCode, test, web, App, HttpServer};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use shardbucket::api::{configure_master, configure_node};
use shardbucket::app_state::AppState;
use shardbucket::config::{AppConfig, Role};
use shardbucket::error::StoreError;
use shardbucket::metadata::mock_store::MockMetadataStore;
use shardbucket::metadata::sqlite_store::SQLiteMetadataStore;
use shardbucket::metadata::StorageNode;
use shardbucket::proxy::http_client::HttpNodeClient;
use shardbucket::proxy::{NodeClient, RemoteWrite};
use shardbucket::storage::local_store::LocalDiskStore;
use shardbucket::storage::mock_store::MockBlobStore;

const NODE_SECRET: &str = "roundtrip-secret";

/// Start a storage node on an ephemeral port, returning its base URL
fn spawn_node(dir: &TempDir) -> String {
    let mut config = AppConfig::default();
    config.role = Role::Node;
    let state = AppState::with_backends(
        config,
        Arc::new(SQLiteMetadataStore::in_memory().unwrap()),
        Arc::new(LocalDiskStore::new(&dir.path().to_string_lossy()).unwrap()),
        Arc::new(HttpNodeClient::new(Duration::from_secs(2), Duration::from_secs(5)).unwrap()),
    );
    state.set_node_secret(NODE_SECRET);
    let data = web::Data::new(state);

    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure_node))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

fn client() -> HttpNodeClient {
    HttpNodeClient::new(Duration::from_secs(2), Duration::from_secs(5)).unwrap()
}

async fn collect(body: shardbucket::proxy::ByteStream) -> Vec<u8> {
    let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
    chunks.concat()
}

#[actix_web::test]
async fn test_client_against_live_node() {
    let dir = TempDir::new().unwrap();
    let url = spawn_node(&dir);
    let client = client();
    let node = StorageNode::new("live-node", &url, NODE_SECRET, 1 << 20, 1, true);

    let probe = client.probe_health(&url).await;
    assert!(probe.healthy, "probe failed: {:?}", probe.error);
    assert_eq!(probe.status, Some(200));

    client
        .write_object(
            &node,
            &RemoteWrite {
                bucket_id: "b-1".to_string(),
                bucket_name: "photos".to_string(),
                object_id: "o-1".to_string(),
                filename: "cat.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                data: Bytes::from_static(b"not really a jpeg"),
            },
        )
        .await
        .unwrap();
    assert!(dir.path().join("photos").join("o-1").is_file());

    let remote = client.read_object(&node, "b-1", "o-1", "cat.jpg").await.unwrap();
    assert_eq!(remote.content_length, Some(17));
    assert_eq!(collect(remote.body).await, b"not really a jpeg");

    client.delete_object(&node, "photos", "o-1").await.unwrap();
    assert!(!dir.path().join("photos").join("o-1").exists());
    // Second delete finds nothing and still succeeds
    client.delete_object(&node, "photos", "o-1").await.unwrap();

    assert!(matches!(
        client.read_object(&node, "b-1", "o-1", "cat.jpg").await,
        Err(StoreError::NotFound(_))
    ));
}

#[actix_web::test]
async fn test_live_node_rejects_wrong_secret() {
    let dir = TempDir::new().unwrap();
    let url = spawn_node(&dir);
    let client = client();
    let imposter = StorageNode::new("live-node", &url, "guess", 1 << 20, 1, true);

    let result = client
        .write_object(
            &imposter,
            &RemoteWrite {
                bucket_id: "b".to_string(),
                bucket_name: "b".to_string(),
                object_id: "o".to_string(),
                filename: "f".to_string(),
                content_type: "text/plain".to_string(),
                data: Bytes::from_static(b"x"),
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::NodeRejected { status: 401 })));
}

#[actix_web::test]
async fn test_unreachable_node_probe() {
    // Nothing listens on port 9 of localhost in the test environment
    let probe = client().probe_health("http://127.0.0.1:9").await;
    assert!(!probe.healthy);
    assert!(probe.error.is_some());
}

#[actix_web::test]
async fn test_master_places_overflow_on_live_node() {
    let dir = TempDir::new().unwrap();
    let node_url = spawn_node(&dir);

    let mut config = AppConfig::default();
    config.storage.max_storage = 8;
    let master = AppState::with_backends(
        config,
        Arc::new(MockMetadataStore::new()),
        Arc::new(MockBlobStore::new()),
        Arc::new(client()),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(master)).configure(configure_master)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/nodes")
        .set_json(json!({ "name": "live-node", "url": node_url, "secret": NODE_SECRET, "capacity": 4096 }))
        .to_request();
    let registered: Value = test::call_and_read_body_json(&app, req).await;
    let node_id = registered["node"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri(&format!("/api/v1/nodes/{}/health", node_id)).to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["healthy"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/buckets")
        .insert_header(("User", "alice"))
        .set_json(json!({ "name": "archive", "public_read": true }))
        .to_request();
    let bucket: Value = test::call_and_read_body_json(&app, req).await;

    let payload = vec![42u8; 1000];
    let req = test::TestRequest::post()
        .uri("/api/v1/buckets/archive/files?filename=blob.bin")
        .insert_header(("User", "alice"))
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let object: Value = test::read_body_json(resp).await;
    let object_id = object["id"].as_str().unwrap().to_string();
    assert!(dir.path().join("archive").join(&object_id).is_file());

    let uri = format!("/api/v1/file/{}/{}", bucket["id"].as_str().unwrap(), object_id);
    let body = test::call_and_read_body(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(body.as_ref(), payload.as_slice());

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/buckets/archive/files/{}", object_id))
        .insert_header(("User", "alice"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    assert!(!dir.path().join("archive").join(&object_id).exists());
}
