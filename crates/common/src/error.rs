//! Error types for the room service.
//!
//! Every variant maps to exactly one public error message (the `message` field
//! of the error body, e.g. `group.member.conflict`) and one HTTP status.
//! Diagnostic text travels in `details`; for server-side and downstream
//! failures it is logged instead and the client only gets a short public text.

use std::collections::BTreeMap;
use std::fmt;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::request_id;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Field name to messages, rendered as the `details` object of an error body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Details(BTreeMap<String, Vec<String>>);

impl Details {
    /// Create an empty details map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Create a details map holding a single message.
    #[must_use]
    pub fn single(key: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = Self::new();
        details.add(key, message);
        details
    }

    /// Append a message for a key.
    pub fn add(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(message.into());
    }

    /// Whether no message was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }
}

impl fmt::Display for Details {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{key}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl From<&validator::ValidationErrors> for Details {
    fn from(errors: &validator::ValidationErrors) -> Self {
        let mut details = Self::new();
        for (field, field_errors) in errors.field_errors() {
            for err in field_errors {
                let message = err
                    .message
                    .as_ref()
                    .map_or_else(|| format!("validation failed: {}", err.code), ToString::to_string);
                details.add(field.to_string(), message);
            }
        }
        details
    }
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Input / shape ===
    /// A query, path or body could not be parsed.
    #[error("request.parse.failed: {0}")]
    RequestParseFailed(String),

    /// A group id is not a UUID.
    #[error("group.id.invalid: {0}")]
    GroupIdInvalid(String),

    /// A room id is not a UUID.
    #[error("room.id.invalid: {0}")]
    RoomIdInvalid(String),

    /// Group input failed validation.
    #[error("group.data.invalid: {0}")]
    GroupDataInvalid(Details),

    /// Room input failed validation.
    #[error("room.data.invalid: {0}")]
    RoomDataInvalid(Details),

    // === Authentication / authorization ===
    /// The caller could not be authenticated; carries the user-facing reason.
    #[error("auth.unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not perform this operation.
    #[error("auth.forbidden: {0}")]
    Forbidden(String),

    /// The attendee is not in an attending status.
    #[error("attendee.status.not.attending: {0}")]
    NotAttending(String),

    // === Not found ===
    /// No live group with this id.
    #[error("group.id.notfound: {0}")]
    GroupNotFound(String),

    /// No live room with this id.
    #[error("room.id.notfound: {0}")]
    RoomNotFound(String),

    /// The attendee is not in a group.
    #[error("group.member.notfound: {0}")]
    GroupMemberNotFound(String),

    /// The attendee is not in a room.
    #[error("room.occupant.notfound: {0}")]
    RoomOccupantNotFound(String),

    /// The registry has no such attendee.
    #[error("attendee.notfound: {0}")]
    AttendeeNotFound(String),

    /// No route matches the request.
    #[error("http.error.notfound: {0}")]
    RouteNotFound(String),

    // === Conflict ===
    /// Another live group has this name.
    #[error("group.data.duplicate: {0}")]
    GroupDataDuplicate(String),

    /// Another live room has this name.
    #[error("room.data.duplicate: {0}")]
    RoomDataDuplicate(String),

    /// The attendee already has a row in this group.
    #[error("group.member.duplicate: {0}")]
    GroupMemberDuplicate(String),

    /// The attendee is in another group.
    #[error("group.member.conflict: {0}")]
    GroupMemberConflict(String),

    /// The attendee is banned from this group.
    #[error("group.member.banned: {0}")]
    GroupMemberBanned(String),

    /// The nickname does not match the invited badge.
    #[error("group.invite.mismatch: {0}")]
    GroupInviteMismatch(String),

    /// The group has no free place.
    #[error("group.size.full: {0}")]
    GroupSizeFull(String),

    /// The new size is below the confirmed member count.
    #[error("group.size.too.small: {0}")]
    GroupSizeTooSmall(String),

    /// The attendee already occupies this room.
    #[error("room.occupant.duplicate: {0}")]
    RoomOccupantDuplicate(String),

    /// The attendee occupies another room.
    #[error("room.occupant.conflict: {0}")]
    RoomOccupantConflict(String),

    /// The room has no free bed.
    #[error("room.size.full: {0}")]
    RoomSizeFull(String),

    /// The new size is below the occupant count.
    #[error("room.size.too.small: {0}")]
    RoomSizeTooSmall(String),

    /// The room still has occupants.
    #[error("room.not.empty: {0}")]
    RoomNotEmpty(String),

    // === Downstream ===
    /// A downstream service was unavailable or answered unexpectedly.
    #[error("downstream unavailable: {0}")]
    Downstream(String),

    // === Server errors ===
    /// Reading groups from storage failed.
    #[error("group read error: {0}")]
    GroupRead(String),

    /// Writing groups to storage failed.
    #[error("group write error: {0}")]
    GroupWrite(String),

    /// Reading rooms from storage failed.
    #[error("room read error: {0}")]
    RoomRead(String),

    /// Writing rooms to storage failed.
    #[error("room write error: {0}")]
    RoomWrite(String),

    /// Storage could not be reached.
    #[error("Database error: {0}")]
    Database(String),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected server failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestParseFailed(_)
            | Self::GroupIdInvalid(_)
            | Self::RoomIdInvalid(_)
            | Self::GroupDataInvalid(_)
            | Self::RoomDataInvalid(_) => StatusCode::BAD_REQUEST,

            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::NotAttending(_) => StatusCode::FORBIDDEN,

            Self::GroupNotFound(_)
            | Self::RoomNotFound(_)
            | Self::GroupMemberNotFound(_)
            | Self::RoomOccupantNotFound(_)
            | Self::AttendeeNotFound(_)
            | Self::RouteNotFound(_) => StatusCode::NOT_FOUND,

            Self::GroupDataDuplicate(_)
            | Self::RoomDataDuplicate(_)
            | Self::GroupMemberDuplicate(_)
            | Self::GroupMemberConflict(_)
            | Self::GroupMemberBanned(_)
            | Self::GroupInviteMismatch(_)
            | Self::GroupSizeFull(_)
            | Self::GroupSizeTooSmall(_)
            | Self::RoomOccupantDuplicate(_)
            | Self::RoomOccupantConflict(_)
            | Self::RoomSizeFull(_)
            | Self::RoomSizeTooSmall(_)
            | Self::RoomNotEmpty(_) => StatusCode::CONFLICT,

            Self::Downstream(_) => StatusCode::BAD_GATEWAY,

            Self::GroupRead(_)
            | Self::GroupWrite(_)
            | Self::RoomRead(_)
            | Self::RoomWrite(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the public message key sent as `message` in the error body.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::RequestParseFailed(_) => "request.parse.failed",
            Self::GroupIdInvalid(_) => "group.id.invalid",
            Self::RoomIdInvalid(_) => "room.id.invalid",
            Self::GroupDataInvalid(_) => "group.data.invalid",
            Self::RoomDataInvalid(_) => "room.data.invalid",
            Self::Unauthorized(_) => "auth.unauthorized",
            Self::Forbidden(_) => "auth.forbidden",
            Self::NotAttending(_) => "attendee.status.not.attending",
            Self::GroupNotFound(_) => "group.id.notfound",
            Self::RoomNotFound(_) => "room.id.notfound",
            Self::GroupMemberNotFound(_) => "group.member.notfound",
            Self::RoomOccupantNotFound(_) => "room.occupant.notfound",
            Self::AttendeeNotFound(_) => "attendee.notfound",
            Self::RouteNotFound(_) => "http.error.notfound",
            Self::GroupDataDuplicate(_) => "group.data.duplicate",
            Self::RoomDataDuplicate(_) => "room.data.duplicate",
            Self::GroupMemberDuplicate(_) => "group.member.duplicate",
            Self::GroupMemberConflict(_) => "group.member.conflict",
            Self::GroupMemberBanned(_) => "group.member.banned",
            Self::GroupInviteMismatch(_) => "group.invite.mismatch",
            Self::GroupSizeFull(_) => "group.size.full",
            Self::GroupSizeTooSmall(_) => "group.size.too.small",
            Self::RoomOccupantDuplicate(_) => "room.occupant.duplicate",
            Self::RoomOccupantConflict(_) => "room.occupant.conflict",
            Self::RoomSizeFull(_) => "room.size.full",
            Self::RoomSizeTooSmall(_) => "room.size.too.small",
            Self::RoomNotEmpty(_) => "room.not.empty",
            Self::Downstream(_) => "attendee.validation.error",
            Self::GroupRead(_) => "group.read.error",
            Self::GroupWrite(_) => "group.write.error",
            Self::RoomRead(_) => "room.read.error",
            Self::RoomWrite(_) => "room.write.error",
            Self::Database(_) | Self::Config(_) | Self::Internal(_) => "http.error.internal",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// The `details` object shown to the client.
    #[must_use]
    pub fn public_details(&self) -> Details {
        match self {
            Self::GroupDataInvalid(details) | Self::RoomDataInvalid(details) => details.clone(),
            Self::Downstream(_) => Details::single("details", "downstream unavailable"),
            Self::GroupRead(_)
            | Self::GroupWrite(_)
            | Self::RoomRead(_)
            | Self::RoomWrite(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Internal(_) => Details::new(),
            Self::RequestParseFailed(d)
            | Self::GroupIdInvalid(d)
            | Self::RoomIdInvalid(d)
            | Self::Unauthorized(d)
            | Self::Forbidden(d)
            | Self::NotAttending(d)
            | Self::GroupNotFound(d)
            | Self::RoomNotFound(d)
            | Self::GroupMemberNotFound(d)
            | Self::RoomOccupantNotFound(d)
            | Self::AttendeeNotFound(d)
            | Self::RouteNotFound(d)
            | Self::GroupDataDuplicate(d)
            | Self::RoomDataDuplicate(d)
            | Self::GroupMemberDuplicate(d)
            | Self::GroupMemberConflict(d)
            | Self::GroupMemberBanned(d)
            | Self::GroupInviteMismatch(d)
            | Self::GroupSizeFull(d)
            | Self::GroupSizeTooSmall(d)
            | Self::RoomOccupantDuplicate(d)
            | Self::RoomOccupantConflict(d)
            | Self::RoomSizeFull(d)
            | Self::RoomSizeTooSmall(d)
            | Self::RoomNotEmpty(d) => {
                if d.is_empty() {
                    Details::new()
                } else {
                    Details::single("details", d.clone())
                }
            }
        }
    }

    /// Build the error body for the current request.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            requestid: request_id::current().unwrap_or_default(),
            message: self.message().to_string(),
            details: self.public_details(),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// When the error was rendered (RFC 3339).
    pub timestamp: String,
    /// Request id of the failing request.
    pub requestid: String,
    /// Public message key.
    pub message: String,
    /// Field to messages.
    pub details: Details,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        match &self {
            Self::Downstream(_) => {
                tracing::warn!(error = %self, message = message, "Downstream failure");
            }
            _ if self.is_server_error() => {
                tracing::error!(error = %self, message = message, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %self, message = message, "Client error occurred");
            }
        }

        (status, Json(self.to_body())).into_response()
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        Self::RequestParseFailed(err.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        Self::RequestParseFailed(err.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(err: PathRejection) -> Self {
        Self::RequestParseFailed(err.body_text())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::GroupIdInvalid(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("invalid api token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::NotAttending(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::GroupMemberBanned(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::RoomNotEmpty(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Downstream("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::GroupWrite("deadlock".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = AppError::Database("connection refused to 10.0.0.3".into());
        assert_eq!(err.message(), "http.error.internal");
        assert!(err.public_details().is_empty());

        let err = AppError::Downstream("connection refused".into());
        assert_eq!(
            err.public_details().get("details").unwrap(),
            ["downstream unavailable".to_string()]
        );
    }

    #[test]
    fn test_client_details_carry_reason() {
        let err = AppError::Unauthorized("invalid bearer token".into());
        assert_eq!(
            err.public_details().get("details").unwrap(),
            ["invalid bearer token".to_string()]
        );
        assert!(AppError::GroupNotFound(String::new()).public_details().is_empty());
    }

    #[test]
    fn test_details_display() {
        let mut details = Details::single("name", "must not be empty");
        details.add("flags", "unknown flag: vip");
        assert_eq!(
            details.to_string(),
            "flags: unknown flag: vip; name: must not be empty"
        );
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(AppError::GroupMemberConflict("84".into()).to_body()).unwrap();
        assert_eq!(body["message"], "group.member.conflict");
        assert_eq!(body["details"]["details"][0], "84");
        assert!(body["timestamp"].is_string());
        assert!(body["requestid"].is_string());
    }
}
