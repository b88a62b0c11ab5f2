//! Telemetry ingestion and fan-out server.
//!
//! Accepts binary exporter streams over HTTP POST, maintains per-user
//! sessions, and relays key-filtered JSON deltas to WebSocket subscribers.

pub mod auth;
pub mod config;
pub mod http_server;
pub mod store;
