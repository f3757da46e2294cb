//! UI-side core and host wired together against a mock storage server

use fsbridge_lib::api::DirectoryEntry;
use fsbridge_lib::ipc::local_pair;
use fsbridge_lib::ipc::transport::spawn_host_process;
use fsbridge_lib::transfer::TransferEvent;
use fsbridge_lib::{AppConfig, Bridge, BridgeError, HeadlessShell, Host, TransferOutcome};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn storage_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "running": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header("authorization", "Basic ZG9yYTpwdw=="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "t1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .and(query_param("token", "t1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "username": "dora", "admin": false })),
        )
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        server_url: "http://127.0.0.1".to_string(),
        server_port: server.address().port(),
        read_chunk_size: 1024,
        ..AppConfig::default()
    }
}

fn in_process_bridge(config: &AppConfig) -> Bridge {
    let (client, host_side) = local_pair();
    let host = Host::new(config.clone(), Arc::new(HeadlessShell)).unwrap();
    tokio::spawn(host.serve(host_side));
    Bridge::connect(client, config).unwrap()
}

async fn ready(bridge: &Bridge) {
    tokio::time::timeout(Duration::from_secs(10), bridge.api().wait_ready())
        .await
        .expect("server ready")
        .unwrap();
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let server = storage_server().await;
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
    Mock::given(method("POST"))
        .and(path("/fs/inbox/a.txt"))
        .and(query_param("token", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "stored" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fs/inbox/a.txt"))
        .and(query_param("token", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, &content).unwrap();
    let target: PathBuf = dir.path().join("copy").join("a.txt");

    let bridge = in_process_bridge(&config_for(&server));
    ready(&bridge).await;
    bridge.api().login("dora", "pw").await.unwrap();
    assert_eq!(bridge.api().username().as_deref(), Some("dora"));

    let mut upload = bridge.transfers().upload(&source, content.len() as u64, "/inbox/a.txt");
    let mut percents = Vec::new();
    let outcome = loop {
        match upload.next().await.expect("upload settles") {
            TransferEvent::Progress(p) => percents.push(p),
            TransferEvent::Completed => break TransferOutcome::Completed,
            other => panic!("unexpected upload event: {:?}", other),
        }
    };
    assert_eq!(outcome, TransferOutcome::Completed);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&100));

    let download = bridge
        .transfers()
        .download("/inbox/a.txt", &target, content.len() as u64);
    assert_eq!(download.wait().await.unwrap(), TransferOutcome::Completed);
    assert_eq!(std::fs::read(&target).unwrap(), content);
    assert!(bridge
        .transfers()
        .is_idle(fsbridge_lib::Direction::Download)
        .await
        .unwrap());
}

#[tokio::test]
async fn failed_download_drains_the_rest_of_the_queue() {
    let server = storage_server().await;
    Mock::given(method("GET"))
        .and(path("/fs/gone.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let bridge = in_process_bridge(&config_for(&server));
    ready(&bridge).await;
    bridge.api().login("dora", "pw").await.unwrap();

    let first = bridge.transfers().download("/gone.bin", dir.path().join("gone.bin"), 10);
    let second = bridge.transfers().download("/next.bin", dir.path().join("next.bin"), 10);
    let duplicate = bridge.transfers().download("/next.bin", dir.path().join("other.bin"), 10);

    assert!(matches!(duplicate.wait().await, Err(BridgeError::Duplicate { .. })));
    assert_eq!(first.wait().await.unwrap_err().code(), "SERVER_ERROR");
    assert!(matches!(second.wait().await, Err(BridgeError::QueueDrained { .. })));
    assert!(!dir.path().join("next.bin").exists());
}

#[tokio::test]
async fn spawned_host_serves_over_stdio() {
    let server = storage_server().await;
    Mock::given(method("GET"))
        .and(path("/fs/docs"))
        .and(query_param("token", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "docs",
            "path": "/docs",
            "children": [
                { "filename": "a.txt", "path": "/docs/a.txt", "size": 3, "created": 0, "modified": 0 }
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("app.config.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec(&config_for(&server)).unwrap(),
    )
    .unwrap();

    let (client, _child) = spawn_host_process(
        std::path::Path::new(env!("CARGO_BIN_EXE_fsbridge")),
        &["--config".to_string(), config_path.to_string_lossy().to_string()],
    )
    .unwrap();
    let bridge = Bridge::connect(client, &config_for(&server)).unwrap();
    ready(&bridge).await;
    bridge.api().login("dora", "pw").await.unwrap();

    let listing = bridge.api().list_dir("/docs").await.unwrap();
    assert_eq!(listing.children.len(), 1);
    assert!(matches!(&listing.children[0], DirectoryEntry::File(f) if f.filename == "a.txt"));
}
