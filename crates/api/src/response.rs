//! Response helpers.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Path prefix of the REST API.
pub const API_PREFIX: &str = "/api/rest/v1";

/// 201 pointing at the created resource.
#[must_use]
pub fn created(location: String) -> Response {
    (StatusCode::CREATED, [(header::LOCATION, location)]).into_response()
}

/// 204 pointing at the affected resource.
#[must_use]
pub fn no_content_at(location: String) -> Response {
    (StatusCode::NO_CONTENT, [(header::LOCATION, location)]).into_response()
}

/// Empty success response.
#[must_use]
pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
