//! Watcher set management: ticking, registration, dedup, expiry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use vigil_core::{Config, ConfigError, ConfigResult, ServiceConfig};
use vigil_reporter::Reporter;

use crate::watcher::Watcher;

/// Owns every watcher and drives the periodic evaluation tick.
///
/// The watcher map sits behind one async mutex: a tick pass and the
/// processing of one registration message each hold the lock end to
/// end, so a message's effects never interleave with a tick.
pub struct Coordinator {
    instance_id: String,
    /// Seconds of life granted to an ephemeral watcher per heartbeat.
    expiry_secs: u64,
    reporter: Arc<dyn Reporter>,
    watchers: Mutex<HashMap<String, Watcher>>,
}

impl Coordinator {
    /// Validate the configuration and build the static watcher set.
    ///
    /// A bad static service definition is fatal here; ephemeral
    /// registrations get the lenient skip-this-entry treatment in
    /// [`Coordinator::receive_registration`] instead.
    pub fn new(config: &Config, reporter: Arc<dyn Reporter>) -> ConfigResult<Self> {
        config.validate()?;

        let mut watchers = HashMap::new();
        for (name, service) in &config.services {
            let watcher = Watcher::static_service(name, &config.instance_id, service.clone())?;
            watchers.insert(watcher.key().to_string(), watcher);
        }
        info!(services = watchers.len(), "created static service watchers");

        Ok(Self {
            instance_id: config.instance_id.clone(),
            expiry_secs: config.ephemeral_service_expiry,
            reporter,
            watchers: Mutex::new(watchers),
        })
    }

    /// Initialize every static watcher, then tick once a second until
    /// the shutdown signal flips. Remaining watchers are closed on the
    /// way out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        {
            let watchers = self.watchers.lock().await;
            for watcher in watchers.values() {
                watcher.init().await?;
            }
            info!(watchers = watchers.len(), "service checks initialized");
        }

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "tick failed, leaving run loop");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.close_all().await;
        Ok(())
    }

    /// One evaluation pass over the live watcher set.
    ///
    /// Expired ephemeral watchers are skipped, not removed — removal
    /// only ever happens through [`Coordinator::remove_watcher`].
    pub async fn tick(&self) -> anyhow::Result<()> {
        let now = epoch_secs();
        let mut watchers = self.watchers.lock().await;
        for watcher in watchers.values_mut() {
            if watcher.is_expired(now) {
                debug!(key = %watcher.key(), "skipping expired watcher");
                continue;
            }
            watcher.tick(self.reporter.as_ref()).await?;
        }
        Ok(())
    }

    /// Close and drop the watcher at `key`.
    ///
    /// Absence is reported, not failed: disconnect cleanup is
    /// best-effort and may race an earlier removal.
    pub async fn remove_watcher(&self, key: &str) {
        let mut watchers = self.watchers.lock().await;
        match watchers.remove(key) {
            Some(mut watcher) => {
                info!(%key, "removing service watcher");
                watcher.close();
            }
            None => {
                warn!(%key, "can't remove service watcher: not present");
            }
        }
    }

    /// Apply one registration message and return every key it touched.
    ///
    /// Per entry: an unchanged content hash is a heartbeat (expiry
    /// refresh, history kept); a changed hash supersedes the old
    /// watcher (history reset); a key with no watcher gets a fresh
    /// ephemeral one. A message without a `services` object is a
    /// silent no-op.
    pub async fn receive_registration(&self, message: &serde_json::Value) -> HashSet<String> {
        let mut touched = HashSet::new();
        let Some(services) = message.get("services").and_then(|v| v.as_object()) else {
            return touched;
        };

        let now = epoch_secs();
        let mut watchers = self.watchers.lock().await;

        for (name, params) in services {
            let hash = content_hash(params);
            let key = registration_key(name, params);

            if let Some(existing) = watchers.get_mut(&key) {
                if existing.content_hash() != Some(hash.as_str()) {
                    info!(%key, "superseding service watcher: parameters changed");
                    if let Some(mut old) = watchers.remove(&key) {
                        old.close();
                    }
                } else {
                    existing.set_expires_at(now + self.expiry_secs);
                    debug!(%key, "refreshed ephemeral watcher expiry");
                }
            }

            if !watchers.contains_key(&key) {
                match self.build_ephemeral(name, params, hash).await {
                    Ok(mut watcher) => {
                        info!(%key, "adding ephemeral service watcher");
                        watcher.set_expires_at(now + self.expiry_secs);
                        watchers.insert(key.clone(), watcher);
                    }
                    Err(e) => {
                        info!(%key, error = %e, "skipping ephemeral registration");
                    }
                }
            }

            touched.insert(key);
        }

        touched
    }

    async fn build_ephemeral(
        &self,
        name: &str,
        params: &serde_json::Value,
        hash: String,
    ) -> ConfigResult<Watcher> {
        let service: ServiceConfig = serde_json::from_value(params.clone())
            .map_err(|e| ConfigError::invalid(name, e.to_string()))?;
        let watcher = Watcher::ephemeral(name, &self.instance_id, service, hash)?;
        watcher
            .init()
            .await
            .map_err(|e| ConfigError::invalid(name, e.to_string()))?;
        Ok(watcher)
    }

    async fn close_all(&self) {
        let mut watchers = self.watchers.lock().await;
        for watcher in watchers.values_mut() {
            watcher.close();
        }
        info!(watchers = watchers.len(), "all watchers closed");
    }

    /// Keys of every tracked watcher, expired ones included.
    pub async fn watcher_keys(&self) -> Vec<String> {
        let watchers = self.watchers.lock().await;
        let mut keys: Vec<String> = watchers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn is_watching(&self, key: &str) -> bool {
        self.watchers.lock().await.contains_key(key)
    }

    /// Expiry timestamp of the watcher at `key`, if any.
    pub async fn expiry_of(&self, key: &str) -> Option<u64> {
        self.watchers.lock().await.get(key).and_then(|w| w.expires_at())
    }

    /// Last damped status of the watcher at `key`, if it has ticked.
    pub async fn status_of(&self, key: &str) -> Option<bool> {
        self.watchers.lock().await.get(key).and_then(|w| w.last_status())
    }
}

/// SHA-256 over the canonical JSON of a registration's params.
///
/// serde_json keeps object keys sorted, so two registrations with the
/// same fields hash identically regardless of wire order.
fn content_hash(params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// `name_port` from the raw params; a missing port leaves it empty,
/// matching the key a later well-formed registration would supersede.
fn registration_key(name: &str, params: &serde_json::Value) -> String {
    match params.get("port") {
        Some(serde_json::Value::Number(n)) => format!("{name}_{n}"),
        Some(serde_json::Value::String(s)) => format!("{name}_{s}"),
        _ => format!("{name}_"),
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
