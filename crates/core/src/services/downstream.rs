//! Shared plumbing for calls to downstream services.

use std::time::Duration;

use reqwest::RequestBuilder;
use roomsvc_common::request_id::REQUEST_ID_HEADER;
use roomsvc_common::{AppError, AppResult, Credentials, RequestContext};

/// Timeout for a single downstream call.
pub const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the shared API secret.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Build an HTTP client with the downstream timeout.
pub fn http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Attach the caller's credentials and the request id to an outgoing call.
pub fn forward(builder: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
    let builder = builder.header(REQUEST_ID_HEADER, &ctx.request_id);

    match &ctx.credentials {
        Credentials::None => builder,
        Credentials::ApiKey(key) => builder.header(API_KEY_HEADER, key),
        Credentials::Bearer(token) => builder.bearer_auth(token),
        Credentials::Cookies {
            id_token_name,
            id_token,
            access_token_name,
            access_token,
        } => builder.header(
            reqwest::header::COOKIE,
            format!("{id_token_name}={id_token}; {access_token_name}={access_token}"),
        ),
    }
}

/// Join a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use roomsvc_common::Caller;

    use super::*;

    fn built(credentials: Credentials) -> reqwest::Request {
        let ctx = RequestContext::new("0a1b2c3d".to_string(), Caller::Machine, credentials);
        let client = reqwest::Client::new();
        forward(client.get("http://localhost/x"), &ctx).build().unwrap()
    }

    #[test]
    fn test_forwards_request_id_and_api_key() {
        let request = built(Credentials::ApiKey("secret".to_string()));
        assert_eq!(request.headers()[REQUEST_ID_HEADER], "0a1b2c3d");
        assert_eq!(request.headers()[API_KEY_HEADER], "secret");
    }

    #[test]
    fn test_forwards_bearer_and_cookies() {
        let request = built(Credentials::Bearer("tok".to_string()));
        assert_eq!(request.headers()["authorization"], "Bearer tok");

        let request = built(Credentials::Cookies {
            id_token_name: "JWT".to_string(),
            id_token: "id".to_string(),
            access_token_name: "AUTH".to_string(),
            access_token: "acc".to_string(),
        });
        assert_eq!(request.headers()["cookie"], "JWT=id; AUTH=acc");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a/", "/b"), "http://a/b");
        assert_eq!(join_url("http://a", "/b"), "http://a/b");
    }
}
