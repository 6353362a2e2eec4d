//! vigil-agent — the running heart of the Vigil daemon.
//!
//! The [`Coordinator`] owns every [`Watcher`] (static ones built from
//! the config file, ephemeral ones pushed over the registration
//! socket) and drives a 1 s evaluation tick. The
//! [`RegistrationServer`] accepts local TCP connections carrying JSON
//! registration messages and retracts a connection's services when it
//! goes away.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── watchers: key → Watcher (static + ephemeral)
//!   ├── 1 s tick: evaluate + report, skipping expired entries
//!   └── receive_registration / remove_watcher
//! RegistrationServer
//!   ├── task per connection
//!   ├── chunk → JSON → Coordinator::receive_registration
//!   └── disconnect → remove every key the connection touched
//! ```

pub mod coordinator;
pub mod server;
pub mod watcher;

pub use coordinator::Coordinator;
pub use server::RegistrationServer;
pub use watcher::{watcher_key, Watcher};
