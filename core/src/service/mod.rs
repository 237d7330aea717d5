//! Sync services: the client-side engine and the server-side endpoints' logic

pub mod client;
pub mod server;
