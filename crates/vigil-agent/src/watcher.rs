//! One watched service: a check engine plus identity and lifetime.

use tracing::debug;

use vigil_check::CheckEngine;
use vigil_core::{ConfigResult, ServiceConfig};
use vigil_reporter::{Reporter, StatusReport};

/// The key a service is tracked under.
pub fn watcher_key(name: &str, port: u16) -> String {
    format!("{name}_{port}")
}

/// A single service under watch.
///
/// Static watchers come from the config file and live for the
/// process; ephemeral watchers come from the registration socket and
/// carry an expiry plus a content hash for change detection.
#[derive(Debug)]
pub struct Watcher {
    key: String,
    name: String,
    instance_id: String,
    config: ServiceConfig,
    engine: CheckEngine,
    is_ephemeral: bool,
    /// Unix seconds after which an ephemeral watcher goes stale.
    expires_at: Option<u64>,
    /// Digest of the registration params. `None` for static watchers.
    content_hash: Option<String>,
    closed: bool,
}

impl Watcher {
    /// Build a watcher for a statically configured service.
    pub fn static_service(
        name: &str,
        instance_id: &str,
        config: ServiceConfig,
    ) -> ConfigResult<Self> {
        Self::build(name, instance_id, config, false, None)
    }

    /// Build a watcher for a live-registered service.
    pub fn ephemeral(
        name: &str,
        instance_id: &str,
        config: ServiceConfig,
        content_hash: String,
    ) -> ConfigResult<Self> {
        Self::build(name, instance_id, config, true, Some(content_hash))
    }

    fn build(
        name: &str,
        instance_id: &str,
        config: ServiceConfig,
        is_ephemeral: bool,
        content_hash: Option<String>,
    ) -> ConfigResult<Self> {
        let engine = CheckEngine::from_config(name, &config)?;
        Ok(Self {
            key: watcher_key(name, config.port),
            name: name.to_string(),
            instance_id: instance_id.to_string(),
            config,
            engine,
            is_ephemeral,
            expires_at: None,
            content_hash,
            closed: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ephemeral(&self) -> bool {
        self.is_ephemeral
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub fn set_expires_at(&mut self, at: u64) {
        self.expires_at = Some(at);
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    /// The last damped status, if the watcher has ticked at least once.
    pub fn last_status(&self) -> Option<bool> {
        self.engine.last_result()
    }

    /// Prepare the underlying probe.
    pub async fn init(&self) -> anyhow::Result<()> {
        self.engine.probe().init().await
    }

    /// Run one evaluate-and-report cycle.
    ///
    /// The status goes to the reporter every tick, changed or not.
    pub async fn tick(&mut self, reporter: &dyn Reporter) -> anyhow::Result<()> {
        let up = self.engine.evaluate().await;
        let report = StatusReport {
            key: self.key.clone(),
            name: self.name.clone(),
            instance_id: self.instance_id.clone(),
            port: self.config.port,
            up,
        };
        reporter.report(&report).await
    }

    /// Release probe resources. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(key = %self.key, "watcher closed");
    }

    /// An ephemeral watcher is expired once `now` passes its expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        self.is_ephemeral && self.expires_at.is_some_and(|at| now > at)
    }
}
