//! State manager: validate, mutate the store, then emit.
//!
//! The store commit always happens before the toggle event is published and
//! the two are not atomic. If publishing fails after a commit, the request
//! fails with [`ServiceError::Delivery`] while the new state stays persisted.

use certflow_core::ToggleNoopPolicy;
use tracing::{info, instrument, warn};

use certflow_core::queue::Publisher;

use crate::emitter::ToggleEmitter;
use crate::error::ServiceError;
use crate::password::hash_password_blocking;
use crate::storage::{CertDatabase, Certificate, NewCertificate, NewUser, ToggleOutcome, User};

/// Result of a status change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleResult {
    /// Whether the stored flag changed (and an event was emitted).
    pub changed: bool,
}

/// Orchestrates every certificate and user operation.
pub struct StateManager<P> {
    db: CertDatabase,
    emitter: ToggleEmitter<P>,
    toggle_noop: ToggleNoopPolicy,
}

impl<P: Publisher> StateManager<P> {
    pub const fn new(
        db: CertDatabase,
        emitter: ToggleEmitter<P>,
        toggle_noop: ToggleNoopPolicy,
    ) -> Self {
        Self {
            db,
            emitter,
            toggle_noop,
        }
    }

    pub const fn db(&self) -> &CertDatabase {
        &self.db
    }

    pub const fn emitter(&self) -> &ToggleEmitter<P> {
        &self.emitter
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// Add an active certificate and announce it as toggled on.
    #[instrument(skip(self, private_key, body))]
    pub async fn add_certificate(
        &self,
        user_uuid: &str,
        private_key: &str,
        body: &str,
    ) -> Result<Certificate, ServiceError> {
        require("user_uuid", user_uuid)?;
        require("private_key", private_key)?;
        require("body", body)?;

        let cert = self
            .db
            .add_certificate(&NewCertificate {
                user_uuid,
                private_key,
                body,
            })
            .await?;

        self.notify(&cert.uuid, cert.active).await?;
        Ok(cert)
    }

    #[instrument(skip(self))]
    pub async fn list_active_certificates(
        &self,
        user_uuid: &str,
    ) -> Result<Vec<Certificate>, ServiceError> {
        require("user_uuid", user_uuid)?;
        Ok(self.db.list_active_certificates(user_uuid).await?)
    }

    /// Set a certificate's active flag and announce the change.
    ///
    /// A same-value request follows the configured [`ToggleNoopPolicy`]; an
    /// accepted no-op emits nothing.
    #[instrument(skip(self))]
    pub async fn set_certificate_active(
        &self,
        cert_uuid: &str,
        user_uuid: &str,
        active: bool,
    ) -> Result<ToggleResult, ServiceError> {
        require("uuid", cert_uuid)?;
        require("user_uuid", user_uuid)?;

        let outcome = self
            .db
            .set_certificate_active(cert_uuid, user_uuid, active, self.toggle_noop)
            .await?;

        match outcome {
            ToggleOutcome::Changed => {
                self.notify(cert_uuid, active).await?;
                Ok(ToggleResult { changed: true })
            }
            ToggleOutcome::Unchanged => {
                info!(cert_uuid, active, "Certificate already in requested state");
                Ok(ToggleResult { changed: false })
            }
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[instrument(skip(self, password))]
    pub async fn add_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        require("name", name)?;
        require("email", email)?;
        require("password", password)?;
        if !email.contains('@') {
            return Err(ServiceError::Validation(format!(
                "email '{email}' is not an address"
            )));
        }

        let password_hash = hash_password_blocking(password.to_string()).await?;
        Ok(self
            .db
            .add_user(&NewUser {
                name,
                email,
                password_hash: &password_hash,
            })
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, uuid: &str) -> Result<User, ServiceError> {
        require("uuid", uuid)?;
        Ok(self.db.get_user(uuid).await?)
    }

    /// Soft-delete a user; their certificates can no longer be toggled.
    #[instrument(skip(self))]
    pub async fn deactivate_user(&self, uuid: &str) -> Result<(), ServiceError> {
        require("uuid", uuid)?;
        Ok(self.db.deactivate_user(uuid).await?)
    }

    async fn notify(&self, cert_uuid: &str, active: bool) -> Result<(), ServiceError> {
        if let Err(e) = self.emitter.emit_toggle(cert_uuid, active).await {
            warn!(
                cert_uuid,
                active,
                error = %e,
                "Store committed but toggle event was not published"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(())
}
