//! Caller authentication.
//!
//! Three kinds of credentials are recognised, in this order: the shared API
//! secret, a bearer access token, and the identity/access token cookie pair.
//! The first one present decides; a present credential that fails validation
//! rejects the request even if a later one would have passed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::StatusCode;
use roomsvc_common::config::SecurityConfig;
use roomsvc_common::request_id::REQUEST_ID_HEADER;
use roomsvc_common::{AppError, AppResult, Caller, CircuitBreaker, Credentials, Identity};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::downstream::http_client;

/// Value of the admin request header that turns an admin into an operator.
pub const ADMIN_REQUEST_VALUE: &str = "available";

/// Header flagging an operator request.
pub const ADMIN_REQUEST_HEADER: &str = "X-Admin-Request";

const INVALID_API_TOKEN: &str = "invalid api token";
const INVALID_BEARER_TOKEN: &str = "invalid bearer token";
const INVALID_ID_TOKEN: &str = "invalid id token in cookie";
const INVALID_ACCESS_TOKEN: &str = "invalid or missing access token in cookie";

/// Reason given to callers without credentials on a protected path.
pub const LOGIN_REQUIRED: &str = "you must be logged in for this operation";

/// Fail for anonymous callers.
pub fn require_login(caller: &Caller) -> AppResult<()> {
    if caller.is_anonymous() {
        Err(AppError::Unauthorized(LOGIN_REQUIRED.to_string()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Userinfo as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    aud: Option<Audience>,
}

impl UserInfo {
    /// Userinfo for `sub` with the given groups and audiences.
    #[must_use]
    pub fn new(sub: impl Into<String>, groups: &[&str], audiences: &[&str]) -> Self {
        Self {
            sub: sub.into(),
            name: None,
            email: None,
            email_verified: false,
            groups: groups.iter().map(ToString::to_string).collect(),
            aud: Some(Audience::Many(
                audiences.iter().map(ToString::to_string).collect(),
            )),
        }
    }

    /// Whether the token was issued for `audience`.
    #[must_use]
    pub fn has_audience(&self, audience: &str) -> bool {
        match &self.aud {
            Some(Audience::One(aud)) => aud == audience,
            Some(Audience::Many(auds)) => auds.iter().any(|a| a == audience),
            None => false,
        }
    }

    fn into_identity(self) -> Identity {
        Identity {
            subject: self.sub,
            name: self.name,
            email: self.email,
            email_verified: self.email_verified,
            groups: self.groups,
        }
    }
}

/// Lookup of access tokens at the identity provider.
#[async_trait]
pub trait UserInfoProvider: Send + Sync {
    /// Userinfo for `access_token`, or `None` if the provider rejects it.
    async fn user_info(&self, access_token: &str, request_id: &str) -> AppResult<Option<UserInfo>>;
}

/// Shared userinfo provider handle.
pub type SharedUserInfoProvider = Arc<dyn UserInfoProvider>;

/// Userinfo provider calling the provider's userinfo endpoint.
#[derive(Clone)]
pub struct HttpUserInfoProvider {
    url: String,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpUserInfoProvider {
    /// Create a provider for the endpoint at `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
            breaker: CircuitBreaker::new("identity-provider"),
        })
    }
}

#[async_trait]
impl UserInfoProvider for HttpUserInfoProvider {
    async fn user_info(&self, access_token: &str, request_id: &str) -> AppResult<Option<UserInfo>> {
        self.breaker.check()?;

        let result = self
            .client
            .get(&self.url)
            .bearer_auth(access_token)
            .header(REQUEST_ID_HEADER, request_id)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure();
                return Err(AppError::Downstream(format!("userinfo request failed: {e}")));
            }
        };

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.breaker.record_success();
                Ok(None)
            }
            status if status.is_success() => match response.json::<UserInfo>().await {
                Ok(info) => {
                    self.breaker.record_success();
                    Ok(Some(info))
                }
                Err(e) => {
                    self.breaker.record_failure();
                    Err(AppError::Downstream(format!("unreadable userinfo response: {e}")))
                }
            },
            status => {
                self.breaker.record_failure();
                Err(AppError::Downstream(format!("userinfo returned {status}")))
            }
        }
    }
}

/// Claims read from a verified identity token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
}

/// Credentials found on an inbound request.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    /// `X-Api-Key` header.
    pub api_key: Option<String>,
    /// `Authorization` header.
    pub authorization: Option<String>,
    /// Identity token cookie.
    pub id_token: Option<String>,
    /// Access token cookie.
    pub access_token: Option<String>,
    /// Whether `X-Admin-Request: available` was sent.
    pub admin_request: bool,
}

impl PresentedCredentials {
    /// Whether no credential at all was presented.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.authorization.is_none()
            && self.id_token.is_none()
            && self.access_token.is_none()
    }
}

/// Authenticates callers.
#[derive(Clone)]
pub struct AuthService {
    api_token: String,
    id_token_cookie: String,
    access_token_cookie: String,
    keys: Arc<Vec<DecodingKey>>,
    validation: Validation,
    admin_group: String,
    audience: Option<String>,
    userinfo: SharedUserInfoProvider,
}

impl AuthService {
    /// Create the service, parsing the configured public keys once.
    pub fn new(security: &SecurityConfig, userinfo: SharedUserInfoProvider) -> AppResult<Self> {
        let oidc = &security.oidc;

        let keys = oidc
            .token_public_keys_pem
            .iter()
            .enumerate()
            .map(|(i, pem)| {
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    AppError::Config(format!("security.oidc.token_public_keys_pem[{i}]: {e}"))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = vec![Algorithm::RS256, Algorithm::RS512];
        match &oidc.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &oidc.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            api_token: security.fixed_token.api.clone(),
            id_token_cookie: oidc.id_token_cookie_name.clone(),
            access_token_cookie: oidc.access_token_cookie_name.clone(),
            keys: Arc::new(keys),
            validation,
            admin_group: oidc.admin_group.clone(),
            audience: oidc.audience.clone(),
            userinfo,
        })
    }

    /// Name of the identity token cookie.
    #[must_use]
    pub fn id_token_cookie_name(&self) -> &str {
        &self.id_token_cookie
    }

    /// Name of the access token cookie.
    #[must_use]
    pub fn access_token_cookie_name(&self) -> &str {
        &self.access_token_cookie
    }

    /// Authenticate the presented credentials.
    ///
    /// Returns [`Caller::Anonymous`] when nothing was presented; deciding
    /// whether that is acceptable is up to the caller.
    pub async fn authenticate(
        &self,
        request_id: &str,
        presented: PresentedCredentials,
    ) -> AppResult<(Caller, Credentials)> {
        if let Some(key) = presented.api_key {
            return self.check_api_key(key);
        }

        if let Some(authorization) = presented.authorization {
            let token = authorization
                .strip_prefix("Bearer ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AppError::Unauthorized(INVALID_BEARER_TOKEN.to_string()))?;

            let info = self
                .lookup(token, request_id)
                .await?
                .ok_or_else(|| AppError::Unauthorized(INVALID_BEARER_TOKEN.to_string()))?;

            let caller = self.caller_for(info, presented.admin_request);
            return Ok((caller, Credentials::Bearer(token.to_string())));
        }

        if presented.id_token.is_some() || presented.access_token.is_some() {
            let id_token = presented
                .id_token
                .ok_or_else(|| AppError::Unauthorized(INVALID_ID_TOKEN.to_string()))?;
            let subject = self.verify_id_token(&id_token)?;

            let access_token = presented
                .access_token
                .ok_or_else(|| AppError::Unauthorized(INVALID_ACCESS_TOKEN.to_string()))?;
            let info = self
                .lookup(&access_token, request_id)
                .await?
                .filter(|info| info.sub == subject)
                .ok_or_else(|| AppError::Unauthorized(INVALID_ACCESS_TOKEN.to_string()))?;

            let caller = self.caller_for(info, presented.admin_request);
            let credentials = Credentials::Cookies {
                id_token_name: self.id_token_cookie.clone(),
                id_token,
                access_token_name: self.access_token_cookie.clone(),
                access_token,
            };
            return Ok((caller, credentials));
        }

        Ok((Caller::Anonymous, Credentials::None))
    }

    fn check_api_key(&self, key: String) -> AppResult<(Caller, Credentials)> {
        let matches: bool = !self.api_token.is_empty()
            && key.as_bytes().ct_eq(self.api_token.as_bytes()).into();

        if matches {
            Ok((Caller::Machine, Credentials::ApiKey(key)))
        } else {
            Err(AppError::Unauthorized(INVALID_API_TOKEN.to_string()))
        }
    }

    /// Userinfo for an access token, dropping tokens issued for another audience.
    async fn lookup(&self, access_token: &str, request_id: &str) -> AppResult<Option<UserInfo>> {
        let info = self.userinfo.user_info(access_token, request_id).await?;
        Ok(info.filter(|info| {
            self.audience
                .as_deref()
                .is_none_or(|audience| info.has_audience(audience))
        }))
    }

    /// Verify an identity token against every configured key, returning its subject.
    fn verify_id_token(&self, token: &str) -> AppResult<String> {
        for key in self.keys.iter() {
            match jsonwebtoken::decode::<IdTokenClaims>(token, key, &self.validation) {
                Ok(data) => return Ok(data.claims.sub),
                Err(e) => tracing::debug!(error = %e, "Identity token rejected by key"),
            }
        }
        Err(AppError::Unauthorized(INVALID_ID_TOKEN.to_string()))
    }

    fn caller_for(&self, info: UserInfo, admin_request: bool) -> Caller {
        let identity = info.into_identity();
        if admin_request && identity.has_group(&self.admin_group) {
            Caller::Operator(identity)
        } else {
            Caller::User(identity)
        }
    }
}
