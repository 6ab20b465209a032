use axum::{
    Json, debug_handler,
    extract::State,
};
use uuid::Uuid;

use crate::{AppResult, AppState, appresult::AppPath, session::CurrentUser};

use super::{ChatCoordinator, HistoryEntry};

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    AppPath(rental_id): AppPath<Uuid>,
    State(chat): State<ChatCoordinator>,
    CurrentUser(_user): CurrentUser,
) -> AppResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(chat.history(rental_id).await?))
}
