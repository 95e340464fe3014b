//! API middleware.

#![allow(missing_docs)]

use std::panic::AssertUnwindSafe;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use futures::FutureExt;
use roomsvc_common::{AppError, AppResult, Config, RequestContext, request_id};
use roomsvc_core::services::auth::{ADMIN_REQUEST_HEADER, ADMIN_REQUEST_VALUE, LOGIN_REQUIRED};
use roomsvc_core::services::downstream::API_KEY_HEADER;
use roomsvc_core::{
    AuthService, CountdownService, GroupService, GroupSettings, PresentedCredentials, RoomService,
    RoomSettings, SharedAttendeeRegistry, SharedMailService, SharedUserInfoProvider,
};
use roomsvc_db::SharedRepository;
use tracing::Instrument;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub group_service: GroupService,
    pub room_service: RoomService,
    pub countdown_service: CountdownService,
    pub anonymous_path: Option<String>,
}

impl AppState {
    /// Wire the services for `config` onto the given back-ends.
    pub fn new(
        config: &Config,
        repo: SharedRepository,
        registry: SharedAttendeeRegistry,
        mailer: SharedMailService,
        userinfo: SharedUserInfoProvider,
    ) -> AppResult<Self> {
        Ok(Self {
            auth_service: AuthService::new(&config.security, userinfo)?,
            group_service: GroupService::new(
                repo.clone(),
                registry.clone(),
                mailer,
                GroupSettings::from_config(&config.service),
            ),
            room_service: RoomService::new(repo, registry, RoomSettings::from_config(&config.service)),
            countdown_service: CountdownService::new(&config.go_live),
            anonymous_path: config.security.anonymous_path.clone(),
        })
    }

    /// Whether `path` may be called without credentials.
    fn is_open(&self, method: &Method, path: &str) -> bool {
        (method == Method::GET && path == "/") || self.anonymous_path.as_deref() == Some(path)
    }
}

fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Assign the request id, scope it to the request and echo it on the response.
pub async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let inbound = req
        .headers()
        .get(request_id::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let id = request_id::accept_or_generate(inbound);

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = request_id::scope(id.clone(), next.run(req))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(request_id_header(), value);
    }
    response
}

/// Turn a panicking handler into a 500.
pub async fn catch_panic_middleware(req: Request<Body>, next: Next) -> Response {
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!(panic = %message, backtrace = %backtrace, "Recovered from panic in handler");

            AppError::Internal(format!("handler panicked: {message}")).into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Collect whatever credentials the request carries.
fn presented_credentials(headers: &HeaderMap, auth: &AuthService) -> PresentedCredentials {
    let jar = CookieJar::from_headers(headers);
    let cookie = |name: &str| jar.get(name).map(|c| c.value().to_string());

    PresentedCredentials {
        api_key: header_value(headers, API_KEY_HEADER),
        authorization: header_value(headers, "Authorization"),
        id_token: cookie(auth.id_token_cookie_name()),
        access_token: cookie(auth.access_token_cookie_name()),
        admin_request: header_value(headers, ADMIN_REQUEST_HEADER)
            .is_some_and(|v| v == ADMIN_REQUEST_VALUE),
    }
}

/// Authentication middleware.
///
/// Rejects invalid credentials, and missing credentials outside the open
/// paths. Puts the [`RequestContext`] into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id::current().unwrap_or_else(request_id::generate);
    let presented = presented_credentials(req.headers(), &state.auth_service);

    let (caller, credentials) = match state
        .auth_service
        .authenticate(&request_id, presented)
        .await
    {
        Ok(authenticated) => authenticated,
        Err(e) => return e.into_response(),
    };

    if caller.is_anonymous() && !state.is_open(req.method(), req.uri().path()) {
        return AppError::Unauthorized(LOGIN_REQUIRED.to_string()).into_response();
    }

    tracing::debug!(caller = ?caller.kind(), "Authenticated request");
    req.extensions_mut()
        .insert(RequestContext::new(request_id, caller, credentials));

    next.run(req).await
}
