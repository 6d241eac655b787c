//! certflow certificate service.
//!
//! Keeps users and their certificates in a transactional store and publishes
//! a toggle event to the queue after every certificate status change.

pub mod emitter;
pub mod error;
pub mod http;
pub mod manager;
pub mod password;
pub mod storage;

pub use emitter::{EmitError, ToggleEmitter};
pub use error::ServiceError;
pub use manager::{StateManager, ToggleResult};
