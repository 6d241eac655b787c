//! User queries.

use certflow_core::db::now_utc;
use tracing::info;

use super::db::{CertDatabase, StoreError, is_unique_violation, unexpected_rows};
use super::models::{NewUser, User};

impl CertDatabase {
    /// Insert a user with a server-generated uuid and timestamp.
    ///
    /// Fails with `Duplicate` when the email is already taken by any user,
    /// active or not.
    pub async fn add_user(&self, params: &NewUser<'_>) -> Result<User, StoreError> {
        let user = User {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: params.name.to_string(),
            email: params.email.to_string(),
            active: true,
            created_at: now_utc(),
        };

        sqlx::query(
            "INSERT INTO users (uuid, name, email, password_hash, active, created_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&user.uuid)
        .bind(&user.name)
        .bind(&user.email)
        .bind(params.password_hash)
        .bind(user.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(params.email.to_string())
            } else {
                StoreError::from(e)
            }
        })?;

        info!(user_uuid = %user.uuid, "User added");
        Ok(user)
    }

    /// Get an active user. Deactivated users are reported as missing.
    pub async fn get_user(&self, uuid: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "SELECT uuid, name, email, active, created_at FROM users WHERE uuid = ? AND active = 1",
        )
        .bind(uuid)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::UserNotFoundOrInactive(uuid.to_string()))
    }

    /// Soft-delete a user. Their certificates stay in place but become frozen.
    pub async fn deactivate_user(&self, uuid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET active = 0 WHERE uuid = ?")
            .bind(uuid)
            .execute(self.pool())
            .await?;

        match result.rows_affected() {
            0 => Err(StoreError::UserNotFoundOrInactive(uuid.to_string())),
            1 => {
                info!(user_uuid = %uuid, "User deactivated");
                Ok(())
            }
            n => Err(unexpected_rows(n)),
        }
    }
}
