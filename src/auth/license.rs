use axum::{
    Json, debug_handler,
    extract::{Multipart, State},
};

use crate::{
    AppResult, AppState,
    session::CurrentUser,
    upload::UploadDir,
    verify::{VerificationOutcome, Verifier},
};

#[debug_handler(state = AppState)]
pub(crate) async fn verify_license(
    State(verifier): State<Verifier>,
    State(uploads): State<UploadDir>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Json<VerificationOutcome>> {
    let document = uploads.save(&mut multipart, "license").await?;
    Ok(Json(verifier.verify_renter(&user, document).await?))
}
