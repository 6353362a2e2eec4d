//! Local TCP server for live service registrations.
//!
//! Short-lived services connect to `127.0.0.1:<listen_port>` and
//! write JSON registration messages. The server remembers which keys
//! each connection registered and retracts them when the connection
//! goes away.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Accepts registration connections and feeds the coordinator.
pub struct RegistrationServer {
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
}

impl RegistrationServer {
    /// Bind the local registration socket.
    pub async fn bind(coordinator: Arc<Coordinator>, listen_port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", listen_port)).await?;
        info!(addr = %listener.local_addr()?, "listening for service registrations");
        Ok(Self {
            coordinator,
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "registration client connected");
                            let coordinator = self.coordinator.clone();
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(coordinator, stream, conn_shutdown).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("registration server shutting down");
                    break;
                }
            }
        }
    }
}

/// One connection's receive loop.
///
/// Each read event's bytes are parsed as exactly one JSON document;
/// a chunk that does not parse is dropped on the floor and the
/// connection keeps going. There is deliberately no framing: existing
/// clients depend on the silent-drop semantics, split or coalesced
/// writes included.
async fn handle_connection(
    coordinator: Arc<Coordinator>,
    mut stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut owned: HashSet<String> = HashSet::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        match serde_json::from_slice::<serde_json::Value>(&buf[..n]) {
                            Ok(message) => {
                                let keys = coordinator.receive_registration(&message).await;
                                owned.extend(keys);
                            }
                            Err(e) => {
                                debug!(error = %e, bytes = n, "discarding unparseable chunk");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "registration connection read failed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                // Process is going down; the coordinator closes every
                // watcher on its own way out.
                return;
            }
        }
    }

    info!(services = owned.len(), "registration client disconnected");
    for key in &owned {
        coordinator.remove_watcher(key).await;
    }
}
