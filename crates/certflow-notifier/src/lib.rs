//! certflow notifier.
//!
//! Consumes certificate toggle events from the queue and relays each one to
//! a downstream HTTP endpoint.

pub mod consumer;
pub mod forwarder;
pub mod pool;

pub use consumer::{ConsumerStats, EventConsumer};
pub use forwarder::{EventSink, ForwardError, HttpForwarder};
pub use pool::{ForwardPool, PoolError};
