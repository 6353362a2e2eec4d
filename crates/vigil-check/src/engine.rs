//! The flap-damping check engine.
//!
//! Raw probe results feed a bounded history; the reported status only
//! changes after `fall` consecutive failures or `rise` consecutive
//! successes. A single flaky probe cannot toggle a service's status.

use std::time::Duration;

use tracing::{debug, info};

use vigil_core::{ConfigResult, ServiceConfig};

use crate::probe::Probe;
use crate::ring::RingBuffer;

/// Hysteresis filter over one service's probe.
#[derive(Debug)]
pub struct CheckEngine {
    name: String,
    probe: Probe,
    timeout: Duration,
    rise: u32,
    fall: u32,
    /// Raw results, newest last. Sized `max(rise, fall)`.
    history: RingBuffer<bool>,
    /// The damped status. `None` until the first evaluation.
    last_result: Option<bool>,
}

impl CheckEngine {
    /// Build an engine and its probe from a service's configuration.
    pub fn from_config(name: &str, config: &ServiceConfig) -> ConfigResult<Self> {
        config.validate(name)?;
        let probe = Probe::from_config(name, config)?;
        let capacity = config.rise.max(config.fall) as usize;
        Ok(Self {
            name: name.to_string(),
            probe,
            timeout: config.timeout(),
            rise: config.rise,
            fall: config.fall,
            history: RingBuffer::new(capacity),
            last_result: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    /// The last damped status, if at least one evaluation has run.
    pub fn last_result(&self) -> Option<bool> {
        self.last_result
    }

    /// Run the probe once and fold the outcome into the damped status.
    ///
    /// Probe errors and timeouts count as failed checks; nothing
    /// propagates past this call.
    pub async fn evaluate(&mut self) -> bool {
        let raw = match tokio::time::timeout(self.timeout, self.probe.check()).await {
            Ok(Ok(up)) => up,
            Ok(Err(e)) => {
                debug!(service = %self.name, error = %e, "check raised, counting as failure");
                false
            }
            Err(_) => {
                debug!(service = %self.name, timeout = ?self.timeout, "check timed out");
                false
            }
        };
        self.observe(raw)
    }

    /// Fold one raw check result into the history and return the
    /// damped status.
    pub fn observe(&mut self, raw: bool) -> bool {
        // First result seeds the whole history so the thresholds have
        // a full window to judge from the start.
        if self.last_result.is_none() {
            for _ in 0..self.history.capacity() {
                self.history.push(raw);
            }
            self.last_result = Some(raw);
            info!(service = %self.name, result = raw, "initial check");
        }

        debug!(service = %self.name, result = raw, "check");
        self.history.push(raw);

        // Down transition first, up second: with rise == fall == 1 the
        // latest single result wins.
        let fallen = self
            .history
            .last_n(self.fall as usize)
            .map(|recent| recent.iter().all(|&r| !r))
            .unwrap_or(false);
        if fallen {
            if self.last_result == Some(true) {
                info!(service = %self.name, failures = self.fall, "service transitions to down");
            }
            self.last_result = Some(false);
        }

        let risen = self
            .history
            .last_n(self.rise as usize)
            .map(|recent| recent.iter().all(|&r| r))
            .unwrap_or(false);
        if risen {
            if self.last_result == Some(false) {
                info!(service = %self.name, successes = self.rise, "service transitions to up");
            }
            self.last_result = Some(true);
        }

        self.last_result.unwrap_or(raw)
    }
}
