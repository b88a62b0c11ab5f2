//! Binary wire codec for the telemetry exporter protocol.
//!
//! Length-framed serial primitives, dictionary-compressed key/value payloads,
//! and message framing with a key table that persists across byte sources.

pub mod dict;
pub mod error;
pub mod message;
pub mod serial;
pub mod types;

pub use error::WireError;
