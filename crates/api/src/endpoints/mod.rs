//! API endpoints.

mod countdown;
mod groups;
mod rooms;

use axum::{
    Router,
    http::{StatusCode, Uri},
    routing::get,
};
use roomsvc_common::AppError;

use crate::middleware::AppState;

/// Create the API router, to be nested under [`crate::response::API_PREFIX`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/countdown", get(countdown::countdown))
        .nest("/groups", groups::router())
        .nest("/rooms", rooms::router())
}

/// Liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::RouteNotFound(format!("no route for {}", uri.path()))
}
