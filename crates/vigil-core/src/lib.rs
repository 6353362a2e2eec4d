//! vigil-core — configuration and shared types for the Vigil daemon.
//!
//! Vigil health-checks locally running services and reports up/down
//! status to a reporter backend. Services come from two places: the
//! static `vigil.toml` configuration, and live registrations pushed
//! over a local TCP socket by short-lived services.
//!
//! This crate holds the configuration model shared by both paths (a
//! registration entry has the same shape as a configured service) and
//! the error taxonomy used across the workspace.

pub mod config;
pub mod error;

pub use config::{CheckKind, Config, ServiceConfig};
pub use error::{ConfigError, ConfigResult};
