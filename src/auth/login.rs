use axum::{Json, debug_handler, extract::State};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{AppError, AppResult, AppState, appresult::AppJson, db::User, session::USER_ID, store::Store};

use super::verify_password;

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(store): State<Store>,
    session: Session,
    AppJson(LoginRequest { email, password }): AppJson<LoginRequest>,
) -> AppResult<Json<User>> {
    let invalid = || AppError::Unauthorized("invalid email or password".to_owned());

    let user = store
        .user_by_email(&email.trim().to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    session.cycle_id().await?;
    session.insert(USER_ID, user.id).await?;
    info!(user_id = %user.id, "user logged in");

    Ok(Json(user))
}
