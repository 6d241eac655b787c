//! Caller-facing error classification.

use crate::emitter::EmitError;
use crate::password::PasswordError;
use crate::storage::StoreError;

/// Every failure a caller of the [`StateManager`](crate::manager::StateManager)
/// can observe.
///
/// A `Delivery` error means the store mutation already committed but the
/// toggle event was not published; callers must not read failure as "no
/// state change".
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFoundOrInactive(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Store unavailable: {0}")]
    Connectivity(String),

    #[error("State persisted but notification failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable name of the error class.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFoundOrInactive(_) => "not_found_or_inactive",
            Self::Duplicate(_) => "duplicate",
            Self::Integrity(_) => "integrity",
            Self::Transaction(_) => "transaction",
            Self::Connectivity(_) => "connectivity",
            Self::Delivery(_) => "delivery",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        let msg = e.to_string();
        match e {
            StoreError::UserNotFoundOrInactive(_) | StoreError::CertificateNotFound(_) => {
                Self::NotFoundOrInactive(msg)
            }
            StoreError::Duplicate(_) => Self::Duplicate(msg),
            StoreError::Transaction(_) => Self::Transaction(msg),
            StoreError::Integrity(_) => Self::Integrity(msg),
            StoreError::Connectivity(_) | StoreError::Open(_) => Self::Connectivity(msg),
        }
    }
}

impl From<EmitError> for ServiceError {
    fn from(e: EmitError) -> Self {
        match e {
            EmitError::Serialize(_) => Self::Internal(e.to_string()),
            EmitError::Delivery { .. } => Self::Delivery(e.to_string()),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(e: PasswordError) -> Self {
        Self::Internal(format!("failed to hash password: {e}"))
    }
}
