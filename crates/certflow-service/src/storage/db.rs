//! `SQLite` certificate store and its transaction helpers.

use sqlx::{Sqlite, Transaction};
use tracing::warn;

use certflow_core::db::DatabaseError;

certflow_core::define_database!(CertDatabase, "Certificate store migrations complete");

/// Failures of store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("User {0} does not exist or is not active")]
    UserNotFoundOrInactive(String),

    #[error("Certificate {0} not found")]
    CertificateNotFound(String),

    #[error("Email {0} is already registered")]
    Duplicate(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Failed to open store: {0}")]
    Open(#[from] DatabaseError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_connectivity(&e) {
            return Self::Connectivity(e.to_string());
        }
        if is_lock_contention(&e) {
            return Self::Transaction(e.to_string());
        }
        Self::Integrity(e.to_string())
    }
}

fn is_connectivity(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// `SQLITE_BUSY`, `SQLITE_BUSY_SNAPSHOT` and `SQLITE_LOCKED`.
const LOCK_CODES: [&str; 3] = ["5", "517", "6"];

/// Whether `e` is a lock conflict with another connection.
fn is_lock_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| LOCK_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

/// Whether `e` is a UNIQUE constraint violation.
pub(super) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Format an affected-row count that should have been exactly one.
pub(super) fn unexpected_rows(count: u64) -> StoreError {
    StoreError::Integrity(format!("rows affected = {count}, should be 1"))
}

impl CertDatabase {
    /// Begin a read transaction on a pooled connection.
    pub(super) async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool().begin().await.map_err(begin_failed)
    }

    /// Begin a transaction that takes the write lock up front.
    ///
    /// A deferred transaction that reads before writing cannot upgrade its
    /// lock while another writer holds it, and `SQLite` reports that at once
    /// instead of waiting out the busy timeout. `BEGIN IMMEDIATE` waits.
    pub(super) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool()
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(begin_failed)
    }

    /// Cheap round trip used by the health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }
}

fn begin_failed(e: sqlx::Error) -> StoreError {
    if is_connectivity(&e) {
        StoreError::Connectivity(e.to_string())
    } else {
        StoreError::Transaction(format!("failed to begin tx: {e}"))
    }
}

pub(super) async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| StoreError::Transaction(format!("failed to commit tx: {e}")))
}

/// Roll back `tx` and return `cause`.
///
/// A failed rollback is reported as a transaction error carrying both
/// messages; the connection is discarded by the pool either way.
pub(super) async fn abort(tx: Transaction<'static, Sqlite>, cause: StoreError) -> StoreError {
    match tx.rollback().await {
        Ok(()) => cause,
        Err(e) => {
            warn!(error = %e, cause = %cause, "Rollback failed");
            StoreError::Transaction(format!("{cause}; failed to roll back tx: {e}"))
        }
    }
}

/// Verify inside `tx` that `user_uuid` exists and is active.
pub(super) async fn check_user(
    tx: &mut Transaction<'static, Sqlite>,
    user_uuid: &str,
) -> Result<(), StoreError> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT uuid FROM users WHERE uuid = ? AND active = 1")
            .bind(user_uuid)
            .fetch_optional(&mut **tx)
            .await?;

    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::UserNotFoundOrInactive(user_uuid.to_string())),
    }
}
