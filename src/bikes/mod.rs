mod handlers;
mod lifecycle;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

pub use lifecycle::{BikeDraft, Lifecycle, Listing};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list).post(handlers::add))
        .route("/rent", post(handlers::rent))
        .route("/return", post(handlers::return_bike))
        .route("/{bike_id}", delete(handlers::delete))
        .route("/{bike_id}/verify", post(handlers::verify))
}
