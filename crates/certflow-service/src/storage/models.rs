//! Data models for the certificate store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as returned to callers. The password hash is never read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Certificate {
    pub uuid: String,
    pub user_uuid: String,
    pub private_key: String,
    pub body: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a user.
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Parameters for inserting a certificate.
pub struct NewCertificate<'a> {
    pub user_uuid: &'a str,
    pub private_key: &'a str,
    pub body: &'a str,
}

/// Result of a status change that passed the ownership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The active flag was written.
    Changed,
    /// The certificate already had the requested flag; nothing was written.
    Unchanged,
}
