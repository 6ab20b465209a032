use axum::{debug_handler, http::StatusCode};
use tower_sessions::Session;

use crate::{AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn logout(session: Session) -> AppResult<StatusCode> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}
