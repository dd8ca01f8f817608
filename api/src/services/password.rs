//! Argon2 password hashing. Hashes are PHC strings, so the salt and
//! parameters travel with the hash.

use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(plain: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(plain.as_bytes(), &salt)?
        .to_string())
}

/// False on mismatch; Err only when the stored hash is malformed.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Hash on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password_blocking(plain: String) -> Result<String, anyhow::Error> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await?
        .map_err(|e| anyhow::anyhow!("{}", e))
}

pub async fn verify_password_blocking(plain: String, hash: String) -> Result<bool, anyhow::Error> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await?
        .map_err(|e| anyhow::anyhow!("{}", e))
}
