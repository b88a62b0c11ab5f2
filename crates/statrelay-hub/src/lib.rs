//! Session registry and subscriber fan-out for the telemetry relay.
//!
//! A `Session` keeps one message decoder and one accumulated state map alive
//! across HTTP requests; the `SubscriptionHub` fans each decoded message out
//! to key-filtered subscribers over bounded channels and sweeps idle
//! sessions.

pub mod hub;
pub mod session;

pub use hub::{
    spawn_idle_sweeper, Subscription, SubscriptionHub, ALL_KEYS, SUBSCRIBER_QUEUE_CAPACITY,
};
pub use session::{state_snapshot_json, Session, SessionRegistry, SessionState, UserId};
