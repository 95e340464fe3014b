//! Notification mails about group changes.
//!
//! Mails are rendered and delivered by a separate mail service; this side only
//! picks the template and fills in the variables. A failed mail never fails the
//! operation that triggered it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roomsvc_common::{AppError, AppResult, CircuitBreaker, RequestContext};
use serde::Serialize;

use super::downstream::{forward, http_client, join_url};

/// Language used for all notifications.
pub const DEFAULT_LANG: &str = "en-US";

/// Mail templates known to the mail service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    /// Sent to an invitee, carries the acceptance link.
    GroupInvited,
    /// Sent to the owner when someone applies.
    GroupApplication,
    /// Sent to the other party when an invitation or application is accepted.
    GroupMemberJoined,
    /// Sent to the owner when an operator adds someone directly.
    GroupMemberAdded,
    /// Sent to someone removed by the owner or an operator.
    GroupMemberKicked,
    /// Sent to the owner when someone leaves.
    GroupMemberLeft,
    /// Sent to the owner when an operator removes someone.
    GroupMemberRemoved,
}

impl MailTemplate {
    /// Template id at the mail service.
    #[must_use]
    pub const fn cid(self) -> &'static str {
        match self {
            Self::GroupInvited => "group-invited",
            Self::GroupApplication => "group-application",
            Self::GroupMemberJoined => "group-member-joined",
            Self::GroupMemberAdded => "group-member-added",
            Self::GroupMemberKicked => "group-member-kicked",
            Self::GroupMemberLeft => "group-member-left",
            Self::GroupMemberRemoved => "group-member-removed",
        }
    }
}

/// A mail to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailRequest {
    pub cid: String,
    pub lang: String,
    pub to: Vec<String>,
    pub variables: BTreeMap<String, String>,
}

impl MailRequest {
    /// A request for `template` to a single recipient.
    #[must_use]
    pub fn new(template: MailTemplate, to: impl Into<String>) -> Self {
        Self {
            cid: template.cid().to_string(),
            lang: DEFAULT_LANG.to_string(),
            to: vec![to.into()],
            variables: BTreeMap::new(),
        }
    }

    /// Add a template variable.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }
}

/// Outgoing mail.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Hand a mail to the mail service.
    async fn send(&self, ctx: &RequestContext, request: MailRequest) -> AppResult<()>;
}

/// Shared mail service handle.
pub type SharedMailService = Arc<dyn MailService>;

/// Mail service that drops everything.
pub struct NoOpMailService;

#[async_trait]
impl MailService for NoOpMailService {
    async fn send(&self, _ctx: &RequestContext, request: MailRequest) -> AppResult<()> {
        tracing::debug!(cid = %request.cid, "Mail delivery disabled, dropping mail");
        Ok(())
    }
}

/// Mail service client speaking the mail service's REST API.
#[derive(Clone)]
pub struct HttpMailService {
    url: String,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpMailService {
    /// Create a mail client for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            url: join_url(base_url, "/api/rest/v1/mail"),
            client: http_client(timeout)?,
            breaker: CircuitBreaker::new("mail-service"),
        })
    }
}

#[async_trait]
impl MailService for HttpMailService {
    async fn send(&self, ctx: &RequestContext, request: MailRequest) -> AppResult<()> {
        self.breaker.check()?;

        let result = forward(self.client.post(&self.url), ctx)
            .json(&request)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.breaker.record_success();
                Ok(())
            }
            Ok(response) => {
                self.breaker.record_failure();
                Err(AppError::Downstream(format!(
                    "mail service returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AppError::Downstream(format!("mail request failed: {e}")))
            }
        }
    }
}
