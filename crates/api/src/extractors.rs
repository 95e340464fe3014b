//! Request extractors.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use roomsvc_common::{AppError, AppResult, RequestContext, request_id};

/// The authenticated request context set by the auth middleware.
///
/// Falls back to an anonymous context when the middleware did not run; the
/// services then refuse anything that needs a login.
#[derive(Debug, Clone)]
pub struct Ctx(pub RequestContext);

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::anonymous(request_id::current().unwrap_or_default()));
        Ok(Self(ctx))
    }
}

/// Parse a badge number path segment.
pub fn parse_badge(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|badge| *badge > 0)
        .ok_or_else(|| {
            AppError::RequestParseFailed(format!("'{raw}' is not a valid badge number"))
        })
}

/// Parse a comma separated list of badge numbers.
pub fn parse_badge_list(raw: Option<&str>) -> AppResult<Vec<i64>> {
    raw.map_or(Ok(Vec::new()), |list| {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_badge)
            .collect()
    })
}
