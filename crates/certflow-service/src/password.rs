//! Password hashing for stored users (argon2id).
//!
//! Plain passwords never reach the store; only the PHC-formatted hash does.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};

pub use argon2::password_hash::Error as PasswordError;

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// Hash on the blocking pool so request tasks are not stalled by argon2.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .unwrap_or(Err(PasswordError::Crypto))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};

    use super::*;

    fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    #[test]
    fn hash_verifies_only_the_hashed_password() {
        let hash = hash_password("tuna").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("tuna", &hash).unwrap());
        assert!(!verify_password("salmon", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash_password("tuna").unwrap(), hash_password("tuna").unwrap());
    }

    #[tokio::test]
    async fn blocking_hash_matches_sync_verify() {
        let hash = hash_password_blocking("tuna".to_string()).await.unwrap();
        assert!(verify_password("tuna", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("tuna", "not-a-phc-string").is_err());
    }
}
