//! `SQLite` storage for the certificate service.
//!
//! Provides transactional persistence for users and certificates.

mod certs;
mod db;
mod models;
mod users;


pub use db::{CertDatabase, StoreError};
pub use models::*;
