//! Router assembly with the full middleware stack.

use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use roomsvc_common::Config;
use roomsvc_common::config::CorsConfig;
use roomsvc_core::services::auth::ADMIN_REQUEST_HEADER;
use roomsvc_core::services::downstream::API_KEY_HEADER;
use tower_http::{
    cors::CorsLayer,
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};

use crate::endpoints;
use crate::middleware::{
    AppState, auth_middleware, catch_panic_middleware, request_id_middleware,
};
use crate::response::API_PREFIX;

/// Build the application.
///
/// Layers, outermost first: request id, panic recovery, CORS (if enabled),
/// tracing, body read deadline, response deadline, authentication.
pub fn app(state: AppState, config: &Config) -> Router {
    let server = &config.server;

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(server.write_timeout_seconds));

    let mut router = Router::new()
        .route("/", get(endpoints::health))
        .nest(API_PREFIX, endpoints::router())
        .fallback(endpoints::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(timeout)
        .layer(RequestBodyTimeoutLayer::new(Duration::from_secs(
            server.read_timeout_seconds,
        )))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&config.security.cors) {
        router = router.layer(cors);
    }

    router
        .layer(middleware::from_fn(catch_panic_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// CORS for development setups where the front-end runs on another origin.
fn cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if cors.disable {
        return None;
    }
    let Some(origin) = cors.allow_origin.as_deref() else {
        tracing::warn!("CORS enabled without an allowed origin, leaving it off");
        return None;
    };
    let origin = match HeaderValue::from_str(origin) {
        Ok(origin) => origin,
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Invalid CORS origin, leaving CORS off");
            return None;
        }
    };

    tracing::warn!(origin = ?origin, "CORS enabled, do not use in production");
    let request_id = HeaderName::from_static("x-request-id");
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static("x-api-key"),
                HeaderName::from_static("x-admin-request"),
                request_id.clone(),
            ])
            .allow_credentials(true)
            .expose_headers([header::LOCATION, request_id]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_is_off_by_default() {
        assert!(cors_layer(&CorsConfig::default()).is_none());
    }

    #[test]
    fn test_cors_needs_an_origin() {
        let cors = CorsConfig {
            disable: false,
            allow_origin: None,
        };
        assert!(cors_layer(&cors).is_none());

        let cors = CorsConfig {
            disable: false,
            allow_origin: Some("http://localhost:8000".to_string()),
        };
        assert!(cors_layer(&cors).is_some());
    }

    #[test]
    fn test_header_names_match_constants() {
        assert!(API_KEY_HEADER.eq_ignore_ascii_case("x-api-key"));
        assert!(ADMIN_REQUEST_HEADER.eq_ignore_ascii_case("x-admin-request"));
    }
}
