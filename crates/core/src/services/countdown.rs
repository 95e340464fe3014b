//! Countdown to the booking start, revealing the booking code once it passes.

use chrono::{DateTime, SecondsFormat, Utc};
use roomsvc_common::config::GoLiveConfig;
use roomsvc_common::{AppError, AppResult, RequestContext};
use serde::Serialize;

/// Secret shown instead of the real code when the time was mocked.
pub const MOCK_SECRET: &str = "mock-booking-code";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountdownView {
    pub current_time: String,
    pub target_time: String,
    pub countdown_seconds: i64,
    pub secret: String,
}

#[derive(Debug, Clone)]
struct Deadline {
    start: Option<DateTime<Utc>>,
    code: String,
}

/// Computes countdowns against the configured go-live deadlines.
#[derive(Debug, Clone)]
pub struct CountdownService {
    public: Deadline,
    staff: Deadline,
    staff_group: Option<String>,
}

impl CountdownService {
    #[must_use]
    pub fn new(go_live: &GoLiveConfig) -> Self {
        Self {
            public: Deadline {
                start: go_live.public_start(),
                code: go_live.public.booking_code.clone(),
            },
            staff: Deadline {
                start: go_live.staff_start(),
                code: go_live.staff.booking_code.clone(),
            },
            staff_group: go_live.staff.group.clone(),
        }
    }

    /// Countdown for the caller, at `current_time_iso` if given or else now.
    pub fn countdown(&self, ctx: &RequestContext, current_time_iso: Option<&str>) -> AppResult<CountdownView> {
        match current_time_iso {
            Some(raw) => {
                let mocked = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        AppError::RequestParseFailed(format!("currentTimeIso is not RFC 3339: {e}"))
                    })?
                    .with_timezone(&Utc);
                Ok(self.countdown_at(ctx, mocked, true))
            }
            None => Ok(self.countdown_at(ctx, Utc::now(), false)),
        }
    }

    fn countdown_at(&self, ctx: &RequestContext, now: DateTime<Utc>, mocked: bool) -> CountdownView {
        let deadline = self.deadline_for(ctx);
        // no configured start means booking is already open
        let target = deadline.start.unwrap_or(now);
        let remaining = (target - now).num_seconds().max(0);

        let secret = if remaining > 0 {
            String::new()
        } else if mocked {
            MOCK_SECRET.to_string()
        } else {
            deadline.code.clone()
        };

        CountdownView {
            current_time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            target_time: target.to_rfc3339_opts(SecondsFormat::Secs, true),
            countdown_seconds: remaining,
            secret,
        }
    }

    fn deadline_for(&self, ctx: &RequestContext) -> &Deadline {
        let is_staff = self
            .staff_group
            .as_deref()
            .is_some_and(|group| ctx.caller.has_group(group));
        if is_staff && self.staff.start.is_some() {
            &self.staff
        } else {
            &self.public
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use roomsvc_common::config::{GoLivePublic, GoLiveStaff};

    use super::*;
    use crate::testing::{anonymous_ctx, user_ctx, user_ctx_with_groups};

    fn service() -> CountdownService {
        let go_live = GoLiveConfig {
            public: GoLivePublic {
                start_iso_datetime: Some("2026-01-10T18:00:00Z".to_string()),
                booking_code: "public-code".to_string(),
            },
            staff: GoLiveStaff {
                start_iso_datetime: Some("2026-01-09T18:00:00Z".to_string()),
                booking_code: "staff-code".to_string(),
                group: Some("staff".to_string()),
            },
        };
        CountdownService::new(&go_live)
    }

    #[test]
    fn test_public_countdown_before_start() {
        let view = service()
            .countdown(&anonymous_ctx(), Some("2026-01-10T17:59:00Z"))
            .unwrap();
        assert_eq!(view.countdown_seconds, 60);
        assert_eq!(view.target_time, "2026-01-10T18:00:00Z");
        assert_eq!(view.current_time, "2026-01-10T17:59:00Z");
        assert!(view.secret.is_empty());
    }

    #[test]
    fn test_mocked_time_hides_real_code() {
        let view = service()
            .countdown(&user_ctx("101"), Some("2026-01-11T00:00:00Z"))
            .unwrap();
        assert_eq!(view.countdown_seconds, 0);
        assert_eq!(view.secret, MOCK_SECRET);
    }

    #[test]
    fn test_staff_deadline() {
        let staff = user_ctx_with_groups("102", &["staff"]);
        let view = service()
            .countdown(&staff, Some("2026-01-09T18:00:00+01:00"))
            .unwrap();
        assert_eq!(view.current_time, "2026-01-09T17:00:00Z");
        assert_eq!(view.target_time, "2026-01-09T18:00:00Z");
        assert_eq!(view.countdown_seconds, 3600);

        let view = service()
            .countdown(&user_ctx("101"), Some("2026-01-09T18:00:00+01:00"))
            .unwrap();
        assert_eq!(view.target_time, "2026-01-10T18:00:00Z");
    }

    #[test]
    fn test_real_time_reveals_code() {
        let view = service().countdown(&anonymous_ctx(), None).unwrap();
        assert_eq!(view.countdown_seconds, 0);
        assert_eq!(view.secret, "public-code");

        let staff = user_ctx_with_groups("102", &["staff"]);
        let view = service().countdown(&staff, None).unwrap();
        assert_eq!(view.secret, "staff-code");
    }

    #[test]
    fn test_unconfigured_start_is_open() {
        let view = CountdownService::new(&GoLiveConfig::default())
            .countdown(&anonymous_ctx(), Some("2026-01-09T17:00:00Z"))
            .unwrap();
        assert_eq!(view.countdown_seconds, 0);
        assert_eq!(view.target_time, view.current_time);
    }

    #[test]
    fn test_bad_mock_time() {
        let err = service()
            .countdown(&anonymous_ctx(), Some("yesterday"))
            .unwrap_err();
        assert_eq!(err.message(), "request.parse.failed");
    }
}
