//! Live stream relay.
//!
//! Forwards streams received by a local ingest server to external
//! destinations, swapping in a placeholder feed while the source is down,
//! and samples per-stream and host health for subscribers.

pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod forwarder;
pub mod ingest;
pub mod logging;
pub mod media_server;
pub mod monitor;
pub mod notification;
pub mod probe;
pub mod registry;
pub mod store;
pub mod system;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{EngineParts, RelayEngine};
pub use error::{Error, Result};
pub use forwarder::{Destination, ForwardingMode, SessionStatus};
