use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppError, AppState, db::User};

/// Session key holding the logged-in user's id.
pub const USER_ID: &str = "user_id";

/// The logged-in user. Rejects with 401 when there is none.
pub struct CurrentUser(pub User);

/// The logged-in user, if any.
pub struct MaybeUser(pub Option<User>);

async fn session_user(parts: &mut Parts, state: &AppState) -> Result<Option<User>, AppError> {
    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, msg)| anyhow::anyhow!("session unavailable: {msg}"))?;

    let Some(user_id) = session.get::<Uuid>(USER_ID).await? else {
        return Ok(None);
    };

    let user = state.store.user(user_id).await?;
    if user.is_none() {
        // account is gone, forget it
        session.flush().await?;
    }
    Ok(user)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        session_user(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("log in first".to_owned()))
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(session_user(parts, state).await?))
    }
}
