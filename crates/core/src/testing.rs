//! In-process fakes of the downstream services.

#![allow(missing_docs)]

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use roomsvc_common::{AppError, AppResult, Caller, Credentials, Identity, RequestContext};
use roomsvc_db::entities::{group_ban, group_member, room, room_group, room_member};
use roomsvc_db::{FindCriteria, GroupStore, HistoryEntry, HistoryStore, InMemoryRepository, RoomStore};
use serde::Serialize;

use crate::services::attendee::{Attendee, AttendeeRegistry, AttendeeStatus};
use crate::services::auth::{UserInfo, UserInfoProvider};
use crate::services::mail::{MailRequest, MailService};

/// Private key signing test identity tokens.
pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("testdata/id_token_key.pem");

/// Public half of [`TEST_PRIVATE_KEY_PEM`].
pub const TEST_PUBLIC_KEY_PEM: &str = include_str!("testdata/id_token_key.pub.pem");

/// An unrelated public key.
pub const TEST_OTHER_PUBLIC_KEY_PEM: &str = include_str!("testdata/other_key.pub.pem");

/// Audience of test tokens.
pub const TEST_AUDIENCE: &str = "roomsvc-test";

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

/// An RS256 identity token for `sub`, expiring `expires_in` seconds from now.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn sign_id_token(sub: &str, aud: &str, expires_in: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub,
        aud,
        exp: now + expires_in,
        iat: now,
    };
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

fn identity(subject: &str, groups: &[&str]) -> Identity {
    Identity {
        subject: subject.to_string(),
        groups: groups.iter().map(ToString::to_string).collect(),
        ..Identity::default()
    }
}

/// Context of an attendee with identity subject `subject`.
#[must_use]
pub fn user_ctx(subject: &str) -> RequestContext {
    RequestContext::new(
        "0a1b2c3d".to_string(),
        Caller::User(identity(subject, &[])),
        Credentials::Bearer(format!("tok-{subject}")),
    )
}

/// Context of an attendee carrying the given identity groups.
#[must_use]
pub fn user_ctx_with_groups(subject: &str, groups: &[&str]) -> RequestContext {
    RequestContext::new(
        "0a1b2c3d".to_string(),
        Caller::User(identity(subject, groups)),
        Credentials::Bearer(format!("tok-{subject}")),
    )
}

/// Context of an operator.
#[must_use]
pub fn operator_ctx(subject: &str) -> RequestContext {
    RequestContext::new(
        "0a1b2c3d".to_string(),
        Caller::Operator(identity(subject, &["admin"])),
        Credentials::Bearer(format!("tok-{subject}")),
    )
}

/// Context of a machine caller.
#[must_use]
pub fn machine_ctx() -> RequestContext {
    RequestContext::new(
        "0a1b2c3d".to_string(),
        Caller::Machine,
        Credentials::ApiKey("api-secret".to_string()),
    )
}

/// Context of an anonymous caller.
#[must_use]
pub fn anonymous_ctx() -> RequestContext {
    RequestContext::anonymous("0a1b2c3d")
}

// ==================== Registry ====================

#[derive(Default)]
struct Registrations {
    attendees: HashMap<i64, (Attendee, AttendeeStatus)>,
    badges: HashMap<String, Vec<i64>>,
}

/// Attendee registry backed by a table.
#[derive(Default)]
pub struct FakeAttendeeRegistry {
    registrations: Mutex<Registrations>,
    unavailable: Mutex<bool>,
}

impl FakeAttendeeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `badge`; its email is the lowercased nickname at example.com.
    #[must_use]
    pub fn with_attendee(self, badge: i64, nickname: &str, status: AttendeeStatus) -> Self {
        self.add_attendee(badge, nickname, status);
        self
    }

    /// Let the identity `subject` own `badges`.
    #[must_use]
    pub fn with_badges(self, subject: &str, badges: &[i64]) -> Self {
        self.registrations
            .lock()
            .badges
            .insert(subject.to_string(), badges.to_vec());
        self
    }

    pub fn add_attendee(&self, badge: i64, nickname: &str, status: AttendeeStatus) {
        let attendee = Attendee {
            id: badge,
            nickname: nickname.to_string(),
            email: format!("{}@example.com", nickname.to_lowercase()),
            avatar: None,
        };
        self.registrations
            .lock()
            .attendees
            .insert(badge, (attendee, status));
    }

    pub fn set_status(&self, badge: i64, status: AttendeeStatus) {
        if let Some(entry) = self.registrations.lock().attendees.get_mut(&badge) {
            entry.1 = status;
        }
    }

    /// Make every call fail as if the registry were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    fn check_available(&self) -> AppResult<()> {
        if *self.unavailable.lock() {
            Err(AppError::Downstream("attendee registry unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AttendeeRegistry for FakeAttendeeRegistry {
    async fn list_my_badges(&self, ctx: &RequestContext) -> AppResult<Vec<i64>> {
        self.check_available()?;
        let Some(identity) = ctx.caller.identity() else {
            return Ok(vec![]);
        };
        Ok(self
            .registrations
            .lock()
            .badges
            .get(&identity.subject)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_status(&self, _ctx: &RequestContext, badge: i64) -> AppResult<AttendeeStatus> {
        self.check_available()?;
        Ok(self
            .registrations
            .lock()
            .attendees
            .get(&badge)
            .map_or(AttendeeStatus::Deleted, |(_, status)| *status))
    }

    async fn get_attendee(&self, _ctx: &RequestContext, badge: i64) -> AppResult<Attendee> {
        self.check_available()?;
        self.registrations
            .lock()
            .attendees
            .get(&badge)
            .map(|(attendee, _)| attendee.clone())
            .ok_or_else(|| AppError::AttendeeNotFound(format!("no registration with badge {badge}")))
    }
}

// ==================== Mail ====================

/// Mail service remembering what it was asked to send.
#[derive(Default)]
pub struct RecordingMailService {
    sent: Mutex<Vec<MailRequest>>,
    failing: Mutex<bool>,
}

impl RecordingMailService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mail accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<MailRequest> {
        self.sent.lock().clone()
    }

    /// Template ids of mails sent to `email`.
    #[must_use]
    pub fn sent_to(&self, email: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.to.iter().any(|to| to == email))
            .map(|m| m.cid.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Reject every mail from now on.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl MailService for RecordingMailService {
    async fn send(&self, _ctx: &RequestContext, request: MailRequest) -> AppResult<()> {
        if *self.failing.lock() {
            return Err(AppError::Downstream("mail service unavailable".to_string()));
        }
        self.sent.lock().push(request);
        Ok(())
    }
}

// ==================== Userinfo ====================

/// Userinfo provider backed by a token table.
#[derive(Default)]
pub struct FixedUserInfo {
    tokens: HashMap<String, UserInfo>,
}

impl FixedUserInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: &str, info: UserInfo) -> Self {
        self.tokens.insert(token.to_string(), info);
        self
    }
}

#[async_trait]
impl UserInfoProvider for FixedUserInfo {
    async fn user_info(&self, access_token: &str, _request_id: &str) -> AppResult<Option<UserInfo>> {
        Ok(self.tokens.get(access_token).cloned())
    }
}

// ==================== Racing repository ====================

/// In-memory repository where a competing writer lands right after the next
/// membership write and before anyone reads it back.
///
/// A group rival is a real confirmed row committed to the store. A room rival
/// is reported as an extra occupant of its room, as by a store whose capacity
/// check did not serialize the two writers.
#[derive(Default)]
pub struct RacingRepository {
    inner: InMemoryRepository,
    group_rival: Mutex<Option<group_member::Model>>,
    room_rival: Mutex<Option<room_member::Model>>,
    room_phantom: Mutex<Option<room_member::Model>>,
}

impl RacingRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm `badge` in `group_id` right after the next membership write there.
    pub fn race_group(&self, group_id: &str, badge: i64) {
        let mut rival = self.inner.new_empty_group_membership(group_id, badge, "rival");
        rival.is_invite = false;
        *self.group_rival.lock() = Some(rival);
    }

    /// Show `badge` in `room_id` right after the next occupant write there.
    pub fn race_room(&self, room_id: &str, badge: i64) {
        *self.room_rival.lock() = Some(self.inner.new_empty_room_membership(room_id, badge, "rival"));
    }

    async fn land_group_rival(&self, group_id: &str) {
        let rival = {
            let mut slot = self.group_rival.lock();
            if slot.as_ref().is_some_and(|r| r.group_id == group_id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(rival) = rival {
            if let Err(e) = self.inner.add_group_membership(rival).await {
                tracing::warn!(error = %e, "Rival membership was refused");
            }
        }
    }

    fn land_room_rival(&self, room_id: &str) {
        let mut slot = self.room_rival.lock();
        if slot.as_ref().is_some_and(|r| r.room_id == room_id) {
            *self.room_phantom.lock() = slot.take();
        }
    }
}

#[async_trait]
impl GroupStore for RacingRepository {
    async fn get_group_by_id(&self, id: &str) -> AppResult<room_group::Model> {
        self.inner.get_group_by_id(id).await
    }

    async fn find_groups(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        self.inner.find_groups(criteria).await
    }

    async fn add_group(&self, group: room_group::Model) -> AppResult<()> {
        self.inner.add_group(group).await
    }

    async fn update_group(&self, group: room_group::Model) -> AppResult<()> {
        self.inner.update_group(group).await
    }

    async fn soft_delete_group(&self, id: &str) -> AppResult<()> {
        self.inner.soft_delete_group(id).await
    }

    async fn undelete_group(&self, id: &str) -> AppResult<()> {
        self.inner.undelete_group(id).await
    }

    async fn get_group_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<group_member::Model>> {
        self.inner.get_group_membership_by_badge(badge).await
    }

    async fn list_group_memberships_by_group(
        &self,
        group_id: &str,
    ) -> AppResult<Vec<group_member::Model>> {
        self.inner.list_group_memberships_by_group(group_id).await
    }

    async fn add_group_membership(&self, membership: group_member::Model) -> AppResult<()> {
        let group_id = membership.group_id.clone();
        self.inner.add_group_membership(membership).await?;
        self.land_group_rival(&group_id).await;
        Ok(())
    }

    async fn update_group_membership(&self, membership: group_member::Model) -> AppResult<()> {
        let group_id = membership.group_id.clone();
        self.inner.update_group_membership(membership).await?;
        self.land_group_rival(&group_id).await;
        Ok(())
    }

    async fn delete_group_membership(&self, badge: i64) -> AppResult<()> {
        self.inner.delete_group_membership(badge).await
    }

    async fn has_group_ban(&self, group_id: &str, badge: i64) -> AppResult<bool> {
        self.inner.has_group_ban(group_id, badge).await
    }

    async fn add_group_ban(&self, ban: group_ban::Model) -> AppResult<()> {
        self.inner.add_group_ban(ban).await
    }

    async fn remove_group_ban(&self, group_id: &str, badge: i64) -> AppResult<()> {
        self.inner.remove_group_ban(group_id, badge).await
    }

    async fn list_group_bans(&self, group_id: &str) -> AppResult<Vec<group_ban::Model>> {
        self.inner.list_group_bans(group_id).await
    }
}

#[async_trait]
impl RoomStore for RacingRepository {
    async fn get_room_by_id(&self, id: &str) -> AppResult<room::Model> {
        self.inner.get_room_by_id(id).await
    }

    async fn find_rooms(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        self.inner.find_rooms(criteria).await
    }

    async fn add_room(&self, room: room::Model) -> AppResult<()> {
        self.inner.add_room(room).await
    }

    async fn update_room(&self, room: room::Model) -> AppResult<()> {
        self.inner.update_room(room).await
    }

    async fn soft_delete_room(&self, id: &str) -> AppResult<()> {
        self.inner.soft_delete_room(id).await
    }

    async fn undelete_room(&self, id: &str) -> AppResult<()> {
        self.inner.undelete_room(id).await
    }

    async fn get_room_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<room_member::Model>> {
        self.inner.get_room_membership_by_badge(badge).await
    }

    async fn list_room_memberships_by_room(
        &self,
        room_id: &str,
    ) -> AppResult<Vec<room_member::Model>> {
        let mut occupants = self.inner.list_room_memberships_by_room(room_id).await?;
        if let Some(phantom) = self.room_phantom.lock().as_ref() {
            if phantom.room_id == room_id {
                occupants.push(phantom.clone());
            }
        }
        Ok(occupants)
    }

    async fn add_room_membership(&self, membership: room_member::Model) -> AppResult<()> {
        let room_id = membership.room_id.clone();
        self.inner.add_room_membership(membership).await?;
        self.land_room_rival(&room_id);
        Ok(())
    }

    async fn update_room_membership(&self, membership: room_member::Model) -> AppResult<()> {
        self.inner.update_room_membership(membership).await
    }

    async fn delete_room_membership(&self, badge: i64) -> AppResult<()> {
        self.inner.delete_room_membership(badge).await
    }
}

#[async_trait]
impl HistoryStore for RacingRepository {
    async fn record_history(&self, entry: HistoryEntry) -> AppResult<()> {
        self.inner.record_history(entry).await
    }
}
