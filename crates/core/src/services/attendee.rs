//! Client for the attendee registry.
//!
//! The registry owns registrations. This service only asks three things of it:
//! which badges belong to the caller, what status a badge is in, and the
//! public data of a badge. All calls run with the caller's own credentials and
//! go through a circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use roomsvc_common::{AppError, AppResult, CircuitBreaker, RequestContext};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::downstream::{forward, http_client, join_url};

/// Registration status as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeStatus {
    New,
    Approved,
    #[serde(alias = "partially paid")]
    PartiallyPaid,
    Paid,
    #[serde(alias = "checked in")]
    CheckedIn,
    Cancelled,
    Waiting,
    Deleted,
}

impl AttendeeStatus {
    /// Whether the registration counts as attending.
    #[must_use]
    pub const fn is_attending(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::PartiallyPaid | Self::Paid | Self::CheckedIn
        )
    }
}

/// Public data of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: i64,
    pub nickname: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Read access to the attendee registry.
#[async_trait]
pub trait AttendeeRegistry: Send + Sync {
    /// Badge numbers registered by the caller, in any order.
    async fn list_my_badges(&self, ctx: &RequestContext) -> AppResult<Vec<i64>>;

    /// Status of a registration. Unknown badges report [`AttendeeStatus::Deleted`].
    async fn get_status(&self, ctx: &RequestContext, badge: i64) -> AppResult<AttendeeStatus>;

    /// Public data of a registration.
    async fn get_attendee(&self, ctx: &RequestContext, badge: i64) -> AppResult<Attendee>;
}

/// Shared registry handle.
pub type SharedAttendeeRegistry = Arc<dyn AttendeeRegistry>;

/// The caller's own badge: the lowest one registered to them.
pub async fn own_badge(registry: &dyn AttendeeRegistry, ctx: &RequestContext) -> AppResult<i64> {
    registry
        .list_my_badges(ctx)
        .await?
        .into_iter()
        .min()
        .ok_or_else(|| AppError::AttendeeNotFound("you do not have a valid registration".to_string()))
}

/// Fail unless `badge` is in an attending status.
pub async fn require_attending(
    registry: &dyn AttendeeRegistry,
    ctx: &RequestContext,
    badge: i64,
) -> AppResult<()> {
    let status = registry.get_status(ctx, badge).await?;
    if status.is_attending() {
        Ok(())
    } else {
        Err(AppError::NotAttending(format!(
            "registration {badge} is not in attending status"
        )))
    }
}

#[derive(Deserialize)]
struct BadgeList {
    #[serde(default)]
    ids: Vec<i64>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: AttendeeStatus,
}

/// Registry client speaking the registry's REST API.
#[derive(Clone)]
pub struct HttpAttendeeRegistry {
    base_url: String,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpAttendeeRegistry {
    /// Create a registry client for `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: http_client(timeout)?,
            breaker: CircuitBreaker::new("attendee-service"),
        })
    }

    /// Breaker guarding the registry.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// GET `path`, decoding a 2xx body. A 404 yields `None`.
    async fn fetch<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> AppResult<Option<T>> {
        self.breaker.check()?;

        let url = join_url(&self.base_url, path);
        let response = match forward(self.client.get(&url), ctx).send().await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure();
                return Err(AppError::Downstream(format!("GET {url} failed: {e}")));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            self.breaker.record_success();
            return Ok(None);
        }
        if !status.is_success() {
            self.breaker.record_failure();
            return Err(AppError::Downstream(format!("GET {url} returned {status}")));
        }

        match response.json::<T>().await {
            Ok(body) => {
                self.breaker.record_success();
                Ok(Some(body))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AppError::Downstream(format!("GET {url} returned an unreadable body: {e}")))
            }
        }
    }
}

#[async_trait]
impl AttendeeRegistry for HttpAttendeeRegistry {
    async fn list_my_badges(&self, ctx: &RequestContext) -> AppResult<Vec<i64>> {
        let list: Option<BadgeList> = self.fetch(ctx, "/api/rest/v1/attendees").await?;
        Ok(list.map(|l| l.ids).unwrap_or_default())
    }

    async fn get_status(&self, ctx: &RequestContext, badge: i64) -> AppResult<AttendeeStatus> {
        let body: Option<StatusBody> = self
            .fetch(ctx, &format!("/api/rest/v1/attendees/{badge}/status"))
            .await?;
        Ok(body.map_or(AttendeeStatus::Deleted, |b| b.status))
    }

    async fn get_attendee(&self, ctx: &RequestContext, badge: i64) -> AppResult<Attendee> {
        self.fetch(ctx, &format!("/api/rest/v1/attendees/{badge}"))
            .await?
            .ok_or_else(|| AppError::AttendeeNotFound(format!("no registration with badge {badge}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeAttendeeRegistry, user_ctx};

    #[test]
    fn test_attending_statuses() {
        assert!(AttendeeStatus::Approved.is_attending());
        assert!(AttendeeStatus::PartiallyPaid.is_attending());
        assert!(AttendeeStatus::Paid.is_attending());
        assert!(AttendeeStatus::CheckedIn.is_attending());
        assert!(!AttendeeStatus::New.is_attending());
        assert!(!AttendeeStatus::Cancelled.is_attending());
        assert!(!AttendeeStatus::Waiting.is_attending());
        assert!(!AttendeeStatus::Deleted.is_attending());
    }

    #[test]
    fn test_status_wire_names() {
        let status: AttendeeStatus = serde_json::from_str("\"partially paid\"").unwrap();
        assert_eq!(status, AttendeeStatus::PartiallyPaid);
        let status: AttendeeStatus = serde_json::from_str("\"checked_in\"").unwrap();
        assert_eq!(status, AttendeeStatus::CheckedIn);
    }

    #[tokio::test]
    async fn test_own_badge_is_lowest() {
        let registry = FakeAttendeeRegistry::new()
            .with_attendee(84, "Panther", AttendeeStatus::Paid)
            .with_attendee(42, "Kitty", AttendeeStatus::Paid)
            .with_badges("101", &[84, 42]);

        let badge = own_badge(&registry, &user_ctx("101")).await.unwrap();
        assert_eq!(badge, 42);
    }

    #[tokio::test]
    async fn test_own_badge_missing() {
        let registry = FakeAttendeeRegistry::new();
        let err = own_badge(&registry, &user_ctx("101")).await.unwrap_err();
        assert_eq!(err.message(), "attendee.notfound");
    }

    #[tokio::test]
    async fn test_require_attending() {
        let registry = FakeAttendeeRegistry::new()
            .with_attendee(42, "Kitty", AttendeeStatus::Paid)
            .with_attendee(43, "Tiger", AttendeeStatus::Cancelled);
        let ctx = user_ctx("101");

        assert!(require_attending(&registry, &ctx, 42).await.is_ok());
        let err = require_attending(&registry, &ctx, 43).await.unwrap_err();
        assert_eq!(err.message(), "attendee.status.not.attending");
        let err = require_attending(&registry, &ctx, 99).await.unwrap_err();
        assert_eq!(err.message(), "attendee.status.not.attending");
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let registry = HttpAttendeeRegistry::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        for _ in 0..roomsvc_common::circuit_breaker::FAILURE_THRESHOLD {
            registry.breaker().record_failure();
        }

        let err = registry.list_my_badges(&user_ctx("101")).await.unwrap_err();
        assert!(matches!(err, AppError::Downstream(_)));
    }
}
