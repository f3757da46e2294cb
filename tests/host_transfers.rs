//! Host operations against a local HTTP server

use fsbridge_lib::config::AppConfig;
use fsbridge_lib::host::{HeadlessShell, Host};
use fsbridge_lib::ipc::{local_pair, CallState, ChannelEvent, ClientTransport, HostCall, RequestId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(port: u16) -> AppConfig {
    AppConfig {
        server_url: "http://127.0.0.1".to_string(),
        server_port: port,
        read_chunk_size: 500,
        ..AppConfig::default()
    }
}

fn serve(config: AppConfig) -> ClientTransport {
    let (client, host_side) = local_pair();
    let host = Host::new(config, Arc::new(HeadlessShell)).unwrap();
    tokio::spawn(host.serve(host_side));
    client
}

fn send(client: &ClientTransport, channel: &str, id: &str, args: Vec<Value>) {
    client
        .outbound
        .send(HostCall {
            channel: channel.to_string(),
            id: RequestId::forced(id),
            args,
        })
        .unwrap();
}

async fn next_event(client: &mut ClientTransport) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(10), client.inbound.recv())
        .await
        .expect("host event")
        .expect("host open")
}

/// Collect events up to and including the terminal one.
async fn until_terminal(client: &mut ClientTransport) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(client).await;
        let terminal = event.state.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn progress_values(events: &[ChannelEvent]) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.state == CallState::Progress)
        .filter_map(|e| e.data.first().and_then(Value::as_u64))
        .collect()
}

#[tokio::test]
async fn server_api_sends_query_headers_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(query_param("token", "tok"))
        .and(header("authorization", "Basic abc"))
        .and(body_json(json!({ "username": "carol", "admin": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "created" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/space"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .mount(&server)
        .await;

    let mut client = serve(config_for(server.address().port()));
    send(
        &client,
        "server-api",
        "r-1",
        vec![
            json!("/auth/register"),
            json!("post"),
            json!({ "token": "tok" }),
            json!({ "username": "carol", "admin": false }),
            json!({ "Authorization": "Basic abc" }),
        ],
    );
    let event = next_event(&mut client).await;
    assert_eq!(event.state, CallState::Done);
    assert_eq!(event.data, vec![json!({ "status": 200, "body": { "message": "created" } })]);

    send(&client, "server-api", "r-2", vec![json!("/space"), json!("get")]);
    let event = next_event(&mut client).await;
    assert_eq!(event.data, vec![json!({ "status": 401, "body": "nope" })]);
}

#[tokio::test]
async fn server_api_reports_connection_failures() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = serve(config_for(port));
    send(&client, "server-api", "r-1", vec![json!("/health"), json!("get")]);
    let event = next_event(&mut client).await;
    assert_eq!(event.state, CallState::Error);
    assert_eq!(event.host_error().code.as_deref(), Some("NETWORK_ERROR"));
}

#[tokio::test]
async fn upload_streams_file_and_reports_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fs/docs/a%20b.bin"))
        .and(query_param("token", "tok"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("content-length", "2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "stored" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("a.bin");
    let content: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&local, &content).unwrap();

    let mut client = serve(config_for(server.address().port()));
    send(
        &client,
        "file-upload",
        "u-1",
        vec![json!(local.to_string_lossy()), json!(2000), json!("tok"), json!("/docs/a b.bin")],
    );

    let events = until_terminal(&mut client).await;
    assert_eq!(events[0].state, CallState::Start);
    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&2000));
    let last = events.last().unwrap();
    assert_eq!(last.state, CallState::Done);
    assert_eq!(last.data, vec![json!({ "status": 200, "body": { "message": "stored" } })]);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received[0].body, content);
}

#[tokio::test]
async fn upload_rejection_carries_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(507))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("a.bin");
    std::fs::write(&local, b"0123456789").unwrap();

    let mut client = serve(config_for(server.address().port()));
    send(
        &client,
        "file-upload",
        "u-1",
        vec![json!(local.to_string_lossy()), json!(10), json!("tok"), json!("/a.bin")],
    );
    let events = until_terminal(&mut client).await;
    let err = events.last().unwrap().host_error();
    assert_eq!(err.status, Some(507));
    assert_eq!(err.code.as_deref(), Some("SERVER_ERROR"));
}

#[tokio::test]
async fn upload_of_missing_file_is_an_io_error() {
    let mut client = serve(config_for(1));
    send(
        &client,
        "file-upload",
        "u-1",
        vec![json!("/definitely/not/here.bin"), json!(10), json!("tok"), json!("/a.bin")],
    );
    let events = until_terminal(&mut client).await;
    assert_eq!(events[0].state, CallState::Start);
    assert_eq!(events.last().unwrap().host_error().code.as_deref(), Some("IO_ERROR"));
}

#[tokio::test]
async fn download_writes_file_with_progress() {
    let server = MockServer::start().await;
    let content: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/fs/reports/q1.csv"))
        .and(query_param("token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("nested").join("q1.csv");

    let mut client = serve(config_for(server.address().port()));
    send(
        &client,
        "file-download",
        "d-1",
        vec![json!("/reports/q1.csv"), json!(local.to_string_lossy()), json!("tok")],
    );

    let events = until_terminal(&mut client).await;
    assert_eq!(events[0].state, CallState::Start);
    assert_eq!(progress_values(&events).last(), Some(&5000));
    assert_eq!(events.last().unwrap().data, vec![json!({ "status": 200 })]);
    assert_eq!(std::fs::read(&local).unwrap(), content);
}

#[tokio::test]
async fn download_rejection_creates_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("missing.txt");

    let mut client = serve(config_for(server.address().port()));
    send(
        &client,
        "file-download",
        "d-1",
        vec![json!("/missing.txt"), json!(local.to_string_lossy()), json!("tok")],
    );
    let events = until_terminal(&mut client).await;
    assert_eq!(events.last().unwrap().host_error().status, Some(404));
    assert!(!local.exists());
}

/// Answers one request with a large Content-Length, sends a first slice of
/// the body, then stalls.
async fn stalling_server(first_slice: usize) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\nContent-Type: application/octet-stream\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&vec![1u8; first_slice]).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });
    port
}

#[tokio::test]
async fn cancelling_a_stalled_download_removes_the_partial_file() {
    let port = stalling_server(1000).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("big.iso");

    let mut client = serve(config_for(port));
    send(
        &client,
        "file-download",
        "d-1",
        vec![json!("/big.iso"), json!(local.to_string_lossy()), json!("tok")],
    );
    assert_eq!(next_event(&mut client).await.state, CallState::Start);

    // Wait until the first slice landed on disk.
    let mut received = 0;
    while received < 1000 {
        let event = next_event(&mut client).await;
        assert_eq!(event.state, CallState::Progress);
        received = event.data[0].as_u64().unwrap();
    }
    assert!(local.exists());

    // A cancel for another path or the other direction leaves it running.
    send(&client, "file-cancel", "c-1", vec![json!("download"), json!("/other.iso")]);
    send(&client, "file-cancel", "c-2", vec![json!("upload"), Value::Null]);
    send(&client, "file-cancel", "c-3", vec![json!("download"), json!("/big.iso")]);

    let event = next_event(&mut client).await;
    assert_eq!(event.state, CallState::Error);
    assert_eq!(event.id.as_str(), "d-1");
    assert_eq!(event.host_error().code.as_deref(), Some("ABORTED"));
    assert!(!local.exists());
}
