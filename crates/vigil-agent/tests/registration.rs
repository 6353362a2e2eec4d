//! Registration protocol integration tests.
//!
//! Drives the full path end to end, in-process: a TCP client writes
//! JSON registration messages to a bound RegistrationServer, the
//! Coordinator mutates its watcher set, and disconnects retract what
//! the connection registered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use vigil_agent::{Coordinator, RegistrationServer};
use vigil_core::Config;
use vigil_reporter::MemoryReporter;

fn test_config() -> Config {
    Config {
        instance_id: "node-1".to_string(),
        services: HashMap::new(),
        listen_port: 0,
        ephemeral_service_expiry: 60,
    }
}

async fn spawn_server(coordinator: Arc<Coordinator>) -> (SocketAddr, watch::Sender<bool>) {
    let server = RegistrationServer::bind(coordinator, 0).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    (addr, shutdown_tx)
}

/// Poll until the coordinator does (or does not) track `key`.
async fn wait_watching(coordinator: &Coordinator, key: &str, expect: bool) {
    for _ in 0..250 {
        if coordinator.is_watching(key).await == expect {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("watcher {key} never became watched={expect}");
}

async fn send(stream: &mut TcpStream, message: &serde_json::Value) {
    stream
        .write_all(message.to_string().as_bytes())
        .await
        .unwrap();
    stream.flush().await.unwrap();
}

#[tokio::test]
async fn disconnect_removes_every_registered_key() {
    let coordinator = Arc::new(
        Coordinator::new(&test_config(), Arc::new(MemoryReporter::new())).unwrap(),
    );
    let (addr, _shutdown) = spawn_server(coordinator.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    send(
        &mut client,
        &serde_json::json!({"services": {
            "web": {"port": 8080},
            "api": {"port": 9090},
        }}),
    )
    .await;

    wait_watching(&coordinator, "web_8080", true).await;
    wait_watching(&coordinator, "api_9090", true).await;

    drop(client);

    wait_watching(&coordinator, "web_8080", false).await;
    wait_watching(&coordinator, "api_9090", false).await;
}

#[tokio::test]
async fn malformed_chunk_is_dropped_and_connection_survives() {
    let coordinator = Arc::new(
        Coordinator::new(&test_config(), Arc::new(MemoryReporter::new())).unwrap(),
    );
    let (addr, _shutdown) = spawn_server(coordinator.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"this is not json {{{").await.unwrap();
    client.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(coordinator.watcher_keys().await.is_empty());

    // The same connection still accepts a well-formed message.
    send(
        &mut client,
        &serde_json::json!({"services": {"web": {"port": 8080}}}),
    )
    .await;
    wait_watching(&coordinator, "web_8080", true).await;
}

#[tokio::test]
async fn identical_double_registration_refreshes_one_watcher() {
    let coordinator = Arc::new(
        Coordinator::new(&test_config(), Arc::new(MemoryReporter::new())).unwrap(),
    );
    let (addr, _shutdown) = spawn_server(coordinator.clone()).await;

    let message = serde_json::json!({"services": {"web": {"port": 8080, "host": "x"}}});

    let mut client = TcpStream::connect(addr).await.unwrap();
    send(&mut client, &message).await;
    wait_watching(&coordinator, "web_8080", true).await;
    let first_expiry = coordinator.expiry_of("web_8080").await.unwrap();

    // A heartbeat one second later lands on a later expiry.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    send(&mut client, &message).await;

    for _ in 0..250 {
        if coordinator.expiry_of("web_8080").await.unwrap() > first_expiry {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(coordinator.watcher_keys().await, vec!["web_8080".to_string()]);
    assert!(coordinator.expiry_of("web_8080").await.unwrap() > first_expiry);
}

#[tokio::test]
async fn disconnect_retraction_is_unconditional() {
    let coordinator = Arc::new(
        Coordinator::new(&test_config(), Arc::new(MemoryReporter::new())).unwrap(),
    );
    let (addr, _shutdown) = spawn_server(coordinator.clone()).await;

    let message = serde_json::json!({"services": {"web": {"port": 8080}}});

    let mut first = TcpStream::connect(addr).await.unwrap();
    send(&mut first, &message).await;
    wait_watching(&coordinator, "web_8080", true).await;

    // A second connection heartbeats the same key.
    let mut second = TcpStream::connect(addr).await.unwrap();
    send(&mut second, &message).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The first connection going away removes the key even though the
    // second still holds it; the second's next heartbeat recreates it.
    drop(first);
    wait_watching(&coordinator, "web_8080", false).await;

    send(&mut second, &message).await;
    wait_watching(&coordinator, "web_8080", true).await;
}

#[tokio::test]
async fn registered_service_reports_status_on_tick() {
    let reporter = Arc::new(MemoryReporter::new());
    let coordinator =
        Arc::new(Coordinator::new(&test_config(), reporter.clone()).unwrap());
    let (addr, _shutdown) = spawn_server(coordinator.clone()).await;

    // A live local listener stands in for the service.
    let service = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = service.local_addr().unwrap().port();
    let key = format!("svc_{port}");

    let mut client = TcpStream::connect(addr).await.unwrap();
    send(
        &mut client,
        &serde_json::json!({"services": {"svc": {"port": port, "timeout": 1.0}}}),
    )
    .await;
    wait_watching(&coordinator, &key, true).await;

    coordinator.tick().await.unwrap();

    let reports = reporter.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].key, key);
    assert_eq!(reports[0].instance_id, "node-1");
    assert!(reports[0].up);
}

#[tokio::test]
async fn server_stops_on_shutdown_signal() {
    let coordinator = Arc::new(
        Coordinator::new(&test_config(), Arc::new(MemoryReporter::new())).unwrap(),
    );
    let server = RegistrationServer::bind(coordinator, 0).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server.run(shutdown_rx));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("server did not stop")
        .unwrap();

    // The socket is gone once the listener drops.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
