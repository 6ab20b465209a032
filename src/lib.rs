pub mod app;
pub mod appresult;
pub mod auth;
pub mod bikes;
pub mod cache;
pub mod config;
pub mod db;
pub mod events;
pub mod jobs;
pub mod rooms;
pub mod session;
pub mod store;
pub mod upload;
pub mod verify;

use axum::extract::FromRef;

pub use appresult::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: store::Store,
    pub lifecycle: bikes::Lifecycle,
    pub verifier: verify::Verifier,
    pub chat: rooms::ChatCoordinator,
    pub uploads: upload::UploadDir,
    pub chat_settings: rooms::ChatSettings,
}
