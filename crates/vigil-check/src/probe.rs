//! Health check probes.
//!
//! One variant per check kind, selected by the `check` field of a
//! service's configuration. A probe answers a single question — is
//! the service up right now — and may fail with an error; the engine
//! folds both outcomes into its hysteresis history.

use std::process::Stdio;

use tracing::debug;

use vigil_core::{CheckKind, ConfigError, ConfigResult, ServiceConfig};

/// A single-shot health probe for one service.
#[derive(Debug, Clone)]
pub enum Probe {
    /// Healthy iff a TCP connection to `addr` succeeds.
    Tcp { addr: String },
    /// Healthy iff `GET http://addr path` returns 2xx.
    Http { addr: String, path: String },
    /// Healthy iff the command exits 0.
    Script { command: String },
}

impl Probe {
    /// Build the probe selected by `config.check`.
    ///
    /// Fails when the selected kind's required fields are absent.
    pub fn from_config(name: &str, config: &ServiceConfig) -> ConfigResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        match config.check {
            CheckKind::Tcp => Ok(Probe::Tcp { addr }),
            CheckKind::Http => {
                let path = config
                    .uri
                    .clone()
                    .ok_or_else(|| ConfigError::invalid(name, "http check requires `uri`"))?;
                Ok(Probe::Http { addr, path })
            }
            CheckKind::Script => {
                let command = config
                    .command
                    .clone()
                    .ok_or_else(|| ConfigError::invalid(name, "script check requires `command`"))?;
                Ok(Probe::Script { command })
            }
        }
    }

    /// Prepare probe resources. Idempotent.
    pub async fn init(&self) -> anyhow::Result<()> {
        match self {
            Probe::Tcp { addr } | Probe::Http { addr, .. } => {
                debug!(%addr, "probe ready");
            }
            Probe::Script { command } => {
                debug!(%command, "probe ready");
            }
        }
        Ok(())
    }

    /// Run the check once. The caller bounds this with the service's
    /// timeout.
    pub async fn check(&self) -> anyhow::Result<bool> {
        match self {
            Probe::Tcp { addr } => {
                tokio::net::TcpStream::connect(addr).await?;
                Ok(true)
            }
            Probe::Http { addr, path } => http_check(addr, path).await,
            Probe::Script { command } => script_check(command).await,
        }
    }
}

/// HTTP GET against the service, healthy on a 2xx response.
async fn http_check(addr: &str, path: &str) -> anyhow::Result<bool> {
    let uri = format!("http://{addr}{path}");

    let stream = tokio::net::TcpStream::connect(addr).await?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", addr)
        .header("user-agent", "vigil/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())?;

    let resp = sender.send_request(req).await?;
    if !resp.status().is_success() {
        debug!(status = %resp.status(), %uri, "http check non-2xx");
    }
    Ok(resp.status().is_success())
}

/// Run the command through `sh -c`, healthy on exit status 0.
async fn script_check(command: &str) -> anyhow::Result<bool> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await?;
    Ok(status.success())
}
