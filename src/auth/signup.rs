use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{
    AppError, AppResult, AppState,
    appresult::{AppJson, is_unique_violation},
    db::{Role, User},
    session::USER_ID,
    store::{NewUser, Store},
};

use super::hash_password;

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Deserialize)]
pub(crate) struct SignupRequest {
    username: String,
    email: String,
    password: String,
    role: Role,
}

#[debug_handler(state = AppState)]
pub(crate) async fn signup(
    State(store): State<Store>,
    session: Session,
    AppJson(SignupRequest {
        username,
        email,
        password,
        role,
    }): AppJson<SignupRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let username = username.trim();
    let email = email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() {
        return Err(AppError::validation("username and email are required"));
    }
    if !email.contains('@') {
        return Err(AppError::validation("email is not valid"));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }

    let password_hash = hash_password(password).await?;
    let user = store
        .create_user(NewUser {
            username,
            email: &email,
            password_hash: &password_hash,
            role,
        })
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict("email is already registered")
            } else {
                err.into()
            }
        })?;

    session.cycle_id().await?;
    session.insert(USER_ID, user.id).await?;
    info!(user_id = %user.id, role = ?user.role, "user signed up");

    Ok((StatusCode::CREATED, Json(user)))
}
