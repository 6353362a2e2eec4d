//! Daemon assembly smoke tests.
//!
//! Wires the subsystems together the way `vigild run` does — config
//! file, coordinator, registration server, shutdown channel — and
//! drives them in-process.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use vigil_agent::{Coordinator, RegistrationServer};
use vigil_core::Config;
use vigil_reporter::MemoryReporter;

#[tokio::test]
async fn daemon_checks_static_and_ephemeral_services() {
    // Two live local listeners stand in for real services.
    let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let web_port = web.local_addr().unwrap().port();
    let api = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_port = api.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("vigil.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
instance_id = "node-1"
listen_port = 0

[services.web]
port = {web_port}
timeout = 1.0
"#
        ),
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let reporter = Arc::new(MemoryReporter::new());
    let coordinator = Arc::new(Coordinator::new(&config, reporter.clone()).unwrap());
    let server = RegistrationServer::bind(coordinator.clone(), config.listen_port)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(server.run(shutdown_rx.clone()));
    let run_handle = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.run(shutdown_rx).await }
    });

    // Register an ephemeral service while the daemon ticks.
    let mut client = TcpStream::connect(addr).await.unwrap();
    let message =
        serde_json::json!({"services": {"api": {"port": api_port, "timeout": 1.0}}});
    client
        .write_all(message.to_string().as_bytes())
        .await
        .unwrap();
    client.flush().await.unwrap();

    // Both services should report up within a few ticks.
    let web_key = format!("web_{web_port}");
    let api_key = format!("api_{api_port}");
    let mut seen_web = false;
    let mut seen_api = false;
    for _ in 0..250 {
        let reports = reporter.reports().await;
        seen_web = reports.iter().any(|r| r.key == web_key && r.up);
        seen_api = reports.iter().any(|r| r.key == api_key && r.up);
        if seen_web && seen_api {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen_web, "static service never reported up");
    assert!(seen_api, "ephemeral service never reported up");

    // Graceful shutdown stops both loops.
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .expect("run loop did not stop")
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("server did not stop")
        .unwrap();
}
