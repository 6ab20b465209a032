use anyhow::anyhow;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{Router, routing::post};

use crate::AppState;

mod license;
mod login;
mod logout;
mod signup;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup::signup))
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
        .route("/verify-license", post(license::verify_license))
}

/// Argon2 PHC string for `password`. Runs on the blocking pool.
pub(crate) async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
            .map_err(|err| anyhow!("could not encode salt: {err}"))?;
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("could not hash password: {err}"))?;
        Ok(hash.to_string())
    })
    .await?
}

pub(crate) async fn verify_password(password: String, hash: String) -> anyhow::Result<bool> {
    let valid = tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    })
    .await?;
    Ok(valid)
}
