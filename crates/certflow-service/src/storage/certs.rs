//! Certificate queries.
//!
//! Every operation runs in its own transaction and re-checks inside it that
//! the owning user exists and is active, so a concurrent deactivation cannot
//! slip between the check and the write.

use certflow_core::ToggleNoopPolicy;
use certflow_core::db::now_utc;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use super::db::{CertDatabase, StoreError, abort, check_user, commit, unexpected_rows};
use super::models::{Certificate, NewCertificate, ToggleOutcome};

impl CertDatabase {
    /// Insert an active certificate for an active user.
    pub async fn add_certificate(
        &self,
        params: &NewCertificate<'_>,
    ) -> Result<Certificate, StoreError> {
        let mut tx = self.begin_write().await?;

        if let Err(e) = check_user(&mut tx, params.user_uuid).await {
            return Err(abort(tx, e).await);
        }

        let cert = Certificate {
            uuid: uuid::Uuid::new_v4().to_string(),
            user_uuid: params.user_uuid.to_string(),
            private_key: params.private_key.to_string(),
            body: params.body.to_string(),
            active: true,
            created_at: now_utc(),
        };

        let inserted = sqlx::query(
            "INSERT INTO certificates (uuid, user_uuid, private_key, body, active, created_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&cert.uuid)
        .bind(&cert.user_uuid)
        .bind(&cert.private_key)
        .bind(&cert.body)
        .bind(cert.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(abort(tx, StoreError::from(e)).await);
        }

        commit(tx).await?;
        info!(cert_uuid = %cert.uuid, user_uuid = %cert.user_uuid, "Certificate added");
        Ok(cert)
    }

    /// List the active certificates of an active user, in storage order.
    pub async fn list_active_certificates(
        &self,
        user_uuid: &str,
    ) -> Result<Vec<Certificate>, StoreError> {
        let mut tx = self.begin().await?;

        if let Err(e) = check_user(&mut tx, user_uuid).await {
            return Err(abort(tx, e).await);
        }

        let certs = sqlx::query_as::<_, Certificate>(
            "SELECT uuid, user_uuid, private_key, body, active, created_at FROM certificates \
             WHERE user_uuid = ? AND active = 1",
        )
        .bind(user_uuid)
        .fetch_all(&mut *tx)
        .await;

        let certs = match certs {
            Ok(certs) => certs,
            Err(e) => return Err(abort(tx, StoreError::from(e)).await),
        };

        commit(tx).await?;
        Ok(certs)
    }

    /// Set a certificate's active flag.
    ///
    /// The update only writes when the stored flag differs from `active` and
    /// is scoped to certificates owned by `user_uuid`. Exactly one row must
    /// change for the transaction to commit; with [`ToggleNoopPolicy::Accept`]
    /// a certificate that already has the requested flag is reported as
    /// [`ToggleOutcome::Unchanged`] instead of an integrity error.
    pub async fn set_certificate_active(
        &self,
        cert_uuid: &str,
        user_uuid: &str,
        active: bool,
        noop: ToggleNoopPolicy,
    ) -> Result<ToggleOutcome, StoreError> {
        let mut tx = self.begin_write().await?;

        if let Err(e) = check_user(&mut tx, user_uuid).await {
            return Err(abort(tx, e).await);
        }

        let outcome = match update_active(&mut tx, cert_uuid, user_uuid, active).await {
            Ok(1) => ToggleOutcome::Changed,
            Ok(0) if noop == ToggleNoopPolicy::Accept => {
                match current_active(&mut tx, cert_uuid, user_uuid).await {
                    Ok(Some(current)) if current == active => ToggleOutcome::Unchanged,
                    Ok(_) => {
                        let e = StoreError::CertificateNotFound(cert_uuid.to_string());
                        return Err(abort(tx, e).await);
                    }
                    Err(e) => return Err(abort(tx, e).await),
                }
            }
            Ok(n) => return Err(abort(tx, unexpected_rows(n)).await),
            Err(e) => return Err(abort(tx, e).await),
        };

        commit(tx).await?;
        debug!(cert_uuid, active, ?outcome, "Certificate status set");
        Ok(outcome)
    }

    /// Read a certificate regardless of its flag or its owner's state.
    pub async fn get_certificate(&self, cert_uuid: &str) -> Result<Certificate, StoreError> {
        sqlx::query_as::<_, Certificate>(
            "SELECT uuid, user_uuid, private_key, body, active, created_at FROM certificates WHERE uuid = ?",
        )
        .bind(cert_uuid)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::CertificateNotFound(cert_uuid.to_string()))
    }
}

async fn update_active(
    tx: &mut Transaction<'static, Sqlite>,
    cert_uuid: &str,
    user_uuid: &str,
    active: bool,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE certificates SET active = ? WHERE uuid = ? AND user_uuid = ? AND active != ?",
    )
    .bind(active)
    .bind(cert_uuid)
    .bind(user_uuid)
    .bind(active)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn current_active(
    tx: &mut Transaction<'static, Sqlite>,
    cert_uuid: &str,
    user_uuid: &str,
) -> Result<Option<bool>, StoreError> {
    let row: Option<(bool,)> =
        sqlx::query_as("SELECT active FROM certificates WHERE uuid = ? AND user_uuid = ?")
            .bind(cert_uuid)
            .bind(user_uuid)
            .fetch_optional(&mut **tx)
            .await?;

    Ok(row.map(|(active,)| active))
}
