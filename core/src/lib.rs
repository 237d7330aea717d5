//! POS order sync engine
//!
//! Registers keep taking orders while the back office is unreachable. Writes
//! are captured into a durable per-register queue and replayed in order once
//! connectivity returns; the server ingests them idempotently by offline id
//! and records each replay pass as a sync session.

pub mod config;
pub mod domain;
pub mod infra;
pub mod service;

pub use config::{ClientConfig, ServerConfig};
pub use infra::db::Database;
pub use infra::event::{Event, EventBus};
pub use service::client::SyncClient;
pub use service::server::ServerContext;
