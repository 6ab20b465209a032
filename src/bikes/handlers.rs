use axum::{
    Json, debug_handler,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    appresult::{AppJson, AppPath},
    db::Bike,
    session::{CurrentUser, MaybeUser},
    upload::UploadDir,
    verify::{VerificationOutcome, Verifier},
};

use super::{BikeDraft, Lifecycle, Listing};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BikeRef {
    bike_id: Uuid,
}

#[derive(Debug, Serialize)]
pub(crate) struct BikeResponse {
    message: &'static str,
    bike: Bike,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(lifecycle): State<Lifecycle>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Json<Listing>> {
    Ok(Json(lifecycle.list(user.as_ref()).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn add(
    State(lifecycle): State<Lifecycle>,
    CurrentUser(user): CurrentUser,
    AppJson(draft): AppJson<BikeDraft>,
) -> AppResult<(StatusCode, Json<BikeResponse>)> {
    let bike = lifecycle.add(&user, draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(BikeResponse {
            message: "Bike added. Upload an ownership document to list it.",
            bike,
        }),
    ))
}

#[debug_handler(state = AppState)]
pub(crate) async fn verify(
    AppPath(bike_id): AppPath<Uuid>,
    State(verifier): State<Verifier>,
    State(uploads): State<UploadDir>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Json<VerificationOutcome>> {
    let document = uploads.save(&mut multipart, "document").await?;
    Ok(Json(verifier.verify_bike(&user, bike_id, document).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn rent(
    State(lifecycle): State<Lifecycle>,
    CurrentUser(user): CurrentUser,
    AppJson(BikeRef { bike_id }): AppJson<BikeRef>,
) -> AppResult<Json<BikeResponse>> {
    let bike = lifecycle.rent(&user, bike_id).await?;
    Ok(Json(BikeResponse {
        message: "Bike rented successfully",
        bike,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn return_bike(
    State(lifecycle): State<Lifecycle>,
    CurrentUser(user): CurrentUser,
    AppJson(BikeRef { bike_id }): AppJson<BikeRef>,
) -> AppResult<Json<BikeResponse>> {
    let bike = lifecycle.return_bike(&user, bike_id).await?;
    Ok(Json(BikeResponse {
        message: "Bike returned successfully",
        bike,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    AppPath(bike_id): AppPath<Uuid>,
    State(lifecycle): State<Lifecycle>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<BikeResponse>> {
    let bike = lifecycle.delete(&user, bike_id).await?;
    Ok(Json(BikeResponse {
        message: "Bike deleted",
        bike,
    }))
}
