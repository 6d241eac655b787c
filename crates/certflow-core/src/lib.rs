//! `certflow` Core Library
//!
//! Shared functionality for the certflow components:
//! - Configuration structs and file loading
//! - `SQLite` pool helpers and the `define_database!` macro
//! - The certificate toggle event
//! - The durable queue connecting the service and the notifier
//! - Tracing initialisation

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod queue;
pub mod tracing_init;

pub use config::{
    Config, DeliveryPolicy, NotifierConfig, QueueConfig, ServiceConfig, ToggleNoopPolicy,
};
pub use error::{Error, Result};
pub use event::CertToggleEvent;
