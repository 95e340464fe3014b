//! Group service: travel parties and the membership handshake.
//!
//! A membership row with `is_invite = true` is pending: an invitation if the
//! owner created it, an application if the candidate did. The other party
//! confirms it by posting to the same membership, which flips the flag.

use std::sync::Arc;

use chrono::Utc;
use roomsvc_common::config::ServiceConfig;
use roomsvc_common::{AppError, AppResult, Details, IdGenerator, RequestContext, is_valid_uuid};
use roomsvc_db::entities::group_member::InviteType;
use roomsvc_db::entities::{group_ban, group_member, join_flags, room_group, split_flags};
use roomsvc_db::{FindCriteria, HistoryEntry, SharedRepository, UNBOUNDED};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use url::Url;
use validator::Validate;

use super::attendee::{Attendee, SharedAttendeeRegistry, own_badge, require_attending};
use super::auth::require_login;
use super::mail::{MailRequest, MailTemplate, SharedMailService};

/// Limits and allow-lists for groups.
#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub max_group_size: u32,
    pub default_group_size: u32,
    pub flags: Vec<String>,
    pub join_link_url: String,
}

impl GroupSettings {
    #[must_use]
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            max_group_size: service.max_group_size,
            default_group_size: service.effective_default_group_size(),
            flags: service.group_flags.clone(),
            join_link_url: service.join_link_url.clone(),
        }
    }
}

/// Input for creating or replacing a group.
///
/// `maximum_size = 0` picks the default (create) or keeps the current value
/// (update); `owner = 0` means the caller (create) or the current owner (update).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct GroupInput {
    #[validate(length(min = 1, max = 80, message = "name must be between 1 and 80 characters"))]
    pub name: String,
    pub flags: Vec<String>,
    #[validate(length(max = 4096, message = "comments must be at most 4096 characters"))]
    pub comments: String,
    pub maximum_size: i64,
    pub owner: i64,
}

/// Options of [`GroupService::add_member`].
#[derive(Debug, Clone, Default)]
pub struct AddMemberOptions {
    /// Nickname of the invitee, proving the owner knows who they invite.
    pub nickname: Option<String>,
    /// Invite code from the invitation mail.
    pub code: Option<String>,
    /// Operator override: add directly and lift any ban.
    pub force: bool,
}

/// Filter for [`GroupService::list_groups`].
#[derive(Debug, Clone)]
pub struct GroupQuery {
    pub member_ids: Vec<i64>,
    pub min_size: u32,
    pub max_size: i64,
}

impl Default for GroupQuery {
    fn default() -> Self {
        Self {
            member_ids: Vec::new(),
            min_size: 0,
            max_size: UNBOUNDED,
        }
    }
}

/// A group member or pending candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberView {
    pub id: i64,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub flags: Vec<String>,
}

impl From<&group_member::Model> for MemberView {
    fn from(m: &group_member::Model) -> Self {
        Self {
            id: m.attendee_id,
            nickname: m.nickname.clone(),
            avatar: m.avatar.clone(),
            flags: split_flags(&m.flags),
        }
    }
}

/// A ban, shown to operators only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanView {
    pub id: i64,
    pub flags: Vec<String>,
    pub comments: String,
}

impl From<group_ban::Model> for BanView {
    fn from(b: group_ban::Model) -> Self {
        Self {
            id: b.attendee_id,
            flags: split_flags(&b.flags),
            comments: b.comments,
        }
    }
}

/// A group as returned to callers.
///
/// The public projection drops `comments` and `owner` and lists only the
/// viewer's own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub maximum_size: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<i64>,
    pub member_count: usize,
    pub members: Vec<MemberView>,
    pub invites: Vec<MemberView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bans: Option<Vec<BanView>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Admin,
    Member,
    Public,
}

/// Who is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
    Admin,
    Attendee(i64),
}

impl Actor {
    const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    fn is(self, badge: i64) -> bool {
        self == Self::Attendee(badge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirmation {
    InviteAccepted,
    ApplicationAccepted,
    ByOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Join {
    Direct,
    Invitation,
    Application,
}

fn check_group_id(id: &str) -> AppResult<()> {
    if is_valid_uuid(id) {
        Ok(())
    } else {
        Err(AppError::GroupIdInvalid(format!("'{id}' is not a valid group id")))
    }
}

fn check_badge(badge: i64) -> AppResult<()> {
    if badge > 0 {
        Ok(())
    } else {
        Err(AppError::RequestParseFailed(
            "badge number must be a positive integer".to_string(),
        ))
    }
}

fn confirmed_count(rows: &[group_member::Model]) -> usize {
    rows.iter().filter(|m| !m.is_invite).count()
}

fn capacity_of(group: &room_group::Model) -> usize {
    group.maximum_size.max(0) as usize
}

fn dedup_flags(flags: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(flags.len());
    for flag in flags {
        if !unique.contains(flag) {
            unique.push(flag.clone());
        }
    }
    unique
}

/// Service for groups and group membership.
#[derive(Clone)]
pub struct GroupService {
    repo: SharedRepository,
    registry: SharedAttendeeRegistry,
    mailer: SharedMailService,
    settings: Arc<GroupSettings>,
    id_gen: IdGenerator,
}

impl GroupService {
    /// Create a new group service.
    #[must_use]
    pub fn new(
        repo: SharedRepository,
        registry: SharedAttendeeRegistry,
        mailer: SharedMailService,
        settings: GroupSettings,
    ) -> Self {
        Self {
            repo,
            registry,
            mailer,
            settings: Arc::new(settings),
            id_gen: IdGenerator::new(),
        }
    }

    // ==================== Groups ====================

    /// Create a group with its owner as the only confirmed member. Returns the new id.
    pub async fn create_group(&self, ctx: &RequestContext, input: GroupInput) -> AppResult<String> {
        let actor = self.actor(ctx, true).await?;
        self.check_input(&input)?;

        let owner = match (actor, input.owner) {
            (Actor::Attendee(me), 0) => me,
            (Actor::Attendee(me), owner) if owner == me => me,
            (Actor::Attendee(_), _) => {
                return Err(AppError::Forbidden(
                    "you can only create groups owned by yourself".to_string(),
                ));
            }
            (Actor::Admin, 0) if ctx.caller.identity().is_some() => {
                own_badge(self.registry.as_ref(), ctx).await?
            }
            (Actor::Admin, 0) => {
                return Err(AppError::GroupDataInvalid(Details::single(
                    "owner",
                    "owner is required",
                )));
            }
            (Actor::Admin, owner) => owner,
        };
        require_attending(self.registry.as_ref(), ctx, owner).await?;

        let same_name = FindCriteria {
            name: Some(input.name.clone()),
            ..FindCriteria::default()
        };
        if !self.repo.find_groups(&same_name).await?.is_empty() {
            return Err(AppError::GroupDataDuplicate(format!(
                "another group with name {} already exists",
                input.name
            )));
        }
        if let Some(existing) = self.repo.get_group_membership_by_badge(owner).await? {
            return Err(AppError::GroupMemberConflict(format!(
                "attendee {owner} is already in group {}",
                existing.group_id
            )));
        }

        let attendee = self.registry.get_attendee(ctx, owner).await?;
        let maximum_size = if input.maximum_size == 0 {
            self.settings.default_group_size
        } else {
            input.maximum_size as u32
        };

        let now = Utc::now();
        let group = room_group::Model {
            id: self.id_gen.generate(),
            name: input.name,
            flags: join_flags(&dedup_flags(&input.flags)),
            comments: input.comments,
            maximum_size: maximum_size as i32,
            owner,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let id = group.id.clone();
        self.repo.add_group(group.clone()).await?;

        let mut owner_row = self
            .repo
            .new_empty_group_membership(&id, owner, &attendee.nickname);
        owner_row.avatar = attendee.avatar;
        owner_row.is_invite = false;
        owner_row.invite_type = InviteType::Direct;

        if let Err(e) = self.repo.add_group_membership(owner_row).await {
            if let Err(undo) = self.repo.soft_delete_group(&id).await {
                tracing::error!(group_id = %id, error = %undo, "Failed to roll back group without owner");
            }
            return Err(e);
        }

        self.record(ctx, &id, "create", json!({ "group": group })).await;
        tracing::info!(group_id = %id, owner = owner, "Group created");
        Ok(id)
    }

    /// Read a group in the view the caller is entitled to.
    pub async fn get_group(&self, ctx: &RequestContext, id: &str) -> AppResult<GroupView> {
        check_group_id(id)?;
        let actor = self.actor(ctx, true).await?;
        let group = self.live_group(id).await?;

        match actor {
            Actor::Admin => self.render(group, Access::Admin, None).await,
            Actor::Attendee(me) => {
                let is_member = self
                    .repo
                    .get_group_membership_by_badge(me)
                    .await?
                    .is_some_and(|m| m.group_id == group.id && !m.is_invite);
                let access = if is_member { Access::Member } else { Access::Public };
                self.render(group, access, Some(me)).await
            }
        }
    }

    /// Replace a group's name, flags, comments, maximum size and owner.
    pub async fn update_group(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: GroupInput,
    ) -> AppResult<()> {
        check_group_id(id)?;
        let actor = self.actor(ctx, true).await?;
        let group = self.live_group(id).await?;
        Self::require_owner_or_admin(actor, &group)?;
        self.check_input(&input)?;

        let rows = self.repo.list_group_memberships_by_group(id).await?;
        let confirmed = confirmed_count(&rows);

        let maximum_size = if input.maximum_size == 0 {
            group.maximum_size
        } else {
            input.maximum_size as i32
        };
        if (maximum_size.max(0) as usize) < confirmed {
            return Err(AppError::GroupSizeTooSmall(format!(
                "group has {confirmed} confirmed members"
            )));
        }

        let owner = if input.owner == 0 { group.owner } else { input.owner };
        if owner != group.owner
            && !rows.iter().any(|m| m.attendee_id == owner && !m.is_invite)
        {
            return Err(AppError::GroupDataInvalid(Details::single(
                "owner",
                "the new owner must be a confirmed member of the group",
            )));
        }

        let updated = room_group::Model {
            name: input.name,
            flags: join_flags(&dedup_flags(&input.flags)),
            comments: input.comments,
            maximum_size,
            owner,
            ..group.clone()
        };
        self.repo.update_group(updated.clone()).await?;

        self.record(ctx, id, "update", json!({ "old": group, "new": updated }))
            .await;
        Ok(())
    }

    /// Remove every membership, then soft-delete the group.
    pub async fn delete_group(&self, ctx: &RequestContext, id: &str) -> AppResult<()> {
        check_group_id(id)?;
        let actor = self.actor(ctx, true).await?;
        let group = self.live_group(id).await?;
        Self::require_owner_or_admin(actor, &group)?;

        let badges: Vec<i64> = self
            .repo
            .list_group_memberships_by_group(id)
            .await?
            .iter()
            .map(|m| m.attendee_id)
            .collect();
        self.repo.soft_delete_group(id).await?;

        self.record(ctx, id, "delete", json!({ "released": badges })).await;
        tracing::info!(group_id = %id, "Group deleted");
        Ok(())
    }

    /// Groups matching `query`. Attendees only see the group they are a confirmed member of.
    pub async fn list_groups(
        &self,
        ctx: &RequestContext,
        query: GroupQuery,
    ) -> AppResult<Vec<GroupView>> {
        let actor = self.actor(ctx, true).await?;

        let mut criteria = FindCriteria {
            min_occupancy: query.min_size,
            max_occupancy: query.max_size,
            any_of_badges: query.member_ids,
            name: None,
        };
        let (access, viewer) = match actor {
            Actor::Admin => (Access::Admin, None),
            Actor::Attendee(me) => {
                criteria.any_of_badges = vec![me];
                (Access::Member, Some(me))
            }
        };

        let ids = self.repo.find_groups(&criteria).await?;
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            let group = self.repo.get_group_by_id(&id).await?;
            views.push(self.render(group, access, viewer).await?);
        }
        Ok(views)
    }

    /// The caller's group. A pending row yields the public view.
    pub async fn find_my_group(&self, ctx: &RequestContext) -> AppResult<GroupView> {
        require_login(&ctx.caller)?;
        let me = own_badge(self.registry.as_ref(), ctx).await?;
        require_attending(self.registry.as_ref(), ctx, me).await?;

        let row = self
            .repo
            .get_group_membership_by_badge(me)
            .await?
            .ok_or_else(|| AppError::GroupMemberNotFound("you are not in a group".to_string()))?;
        let group = self.live_group(&row.group_id).await?;

        let access = if row.is_invite {
            Access::Public
        } else if ctx.caller.is_admin() {
            Access::Admin
        } else {
            Access::Member
        };
        self.render(group, access, Some(me)).await
    }

    // ==================== Membership ====================

    /// Invite, apply, accept or force-add, depending on who calls and what row exists.
    ///
    /// Returns the invite code when an invitation was created.
    pub async fn add_member(
        &self,
        ctx: &RequestContext,
        group_id: &str,
        badge: i64,
        options: AddMemberOptions,
    ) -> AppResult<Option<String>> {
        check_group_id(group_id)?;
        check_badge(badge)?;
        let actor = self.actor(ctx, true).await?;
        let group = self.live_group(group_id).await?;

        if options.force && !actor.is_admin() {
            return Err(AppError::Forbidden(
                "only operators may force membership changes".to_string(),
            ));
        }
        if !actor.is_admin() && !actor.is(group.owner) && !actor.is(badge) {
            return Err(AppError::Forbidden(
                "you can only invite others into groups you own".to_string(),
            ));
        }

        let existing = self.repo.get_group_membership_by_badge(badge).await?;

        // An owner inviting someone outside the group must prove the nickname
        // before learning anything about the badge.
        let invitee = if !actor.is_admin()
            && !actor.is(badge)
            && existing.as_ref().is_none_or(|row| row.group_id != group.id)
        {
            Some(
                self.verify_invitee(ctx, badge, options.nickname.as_deref())
                    .await?,
            )
        } else {
            None
        };

        match existing {
            Some(row) if row.group_id != group.id => Err(AppError::GroupMemberConflict(format!(
                "attendee {badge} is already in another group"
            ))),
            Some(row) if !row.is_invite => Err(AppError::GroupMemberDuplicate(format!(
                "attendee {badge} is already a member of this group"
            ))),
            Some(row) => self.confirm(ctx, actor, &group, row, &options).await.map(|()| None),
            None => self.join(ctx, actor, &group, badge, invitee, &options).await,
        }
    }

    /// The invitee's registration, if `nickname` matches it. Unknown badges,
    /// wrong nicknames and non-attending registrations all fail the same way.
    async fn verify_invitee(
        &self,
        ctx: &RequestContext,
        badge: i64,
        nickname: Option<&str>,
    ) -> AppResult<Attendee> {
        let mismatch =
            || AppError::GroupInviteMismatch(format!("nickname does not match badge {badge}"));

        let attendee = match self.registry.get_attendee(ctx, badge).await {
            Ok(attendee) => attendee,
            Err(AppError::AttendeeNotFound(_)) => return Err(mismatch()),
            Err(e) => return Err(e),
        };
        if nickname != Some(attendee.nickname.as_str()) {
            return Err(mismatch());
        }

        match require_attending(self.registry.as_ref(), ctx, badge).await {
            Ok(()) => Ok(attendee),
            Err(AppError::NotAttending(_)) => Err(mismatch()),
            Err(e) => Err(e),
        }
    }

    /// Flip a pending row to confirmed.
    async fn confirm(
        &self,
        ctx: &RequestContext,
        actor: Actor,
        group: &room_group::Model,
        row: group_member::Model,
        options: &AddMemberOptions,
    ) -> AppResult<()> {
        let badge = row.attendee_id;

        let confirmation = if actor.is_admin() {
            Confirmation::ByOperator
        } else if actor.is(badge) && row.invite_type == InviteType::Invite {
            let code_matches: bool = match (options.code.as_deref(), row.invite_code.as_deref()) {
                (Some(given), Some(expected)) => given.as_bytes().ct_eq(expected.as_bytes()).into(),
                _ => false,
            };
            if !code_matches {
                return Err(AppError::Forbidden("invalid or missing invite code".to_string()));
            }
            Confirmation::InviteAccepted
        } else if actor.is(group.owner) && row.invite_type == InviteType::Application {
            Confirmation::ApplicationAccepted
        } else {
            return Err(AppError::GroupMemberDuplicate(format!(
                "attendee {badge} already has a pending membership in this group"
            )));
        };

        require_attending(self.registry.as_ref(), ctx, badge).await?;

        let rows = self.repo.list_group_memberships_by_group(&group.id).await?;
        if confirmed_count(&rows) >= capacity_of(group) {
            return Err(AppError::GroupSizeFull(group.id.clone()));
        }

        let mut confirmed = row.clone();
        confirmed.is_invite = false;
        confirmed.invite_code = None;
        self.repo.update_group_membership(confirmed).await?;

        let rows = self.repo.list_group_memberships_by_group(&group.id).await?;
        if confirmed_count(&rows) > capacity_of(group) {
            if let Err(e) = self.repo.update_group_membership(row).await {
                tracing::error!(group_id = %group.id, badge = badge, error = %e, "Failed to undo confirmation over capacity");
            }
            return Err(AppError::GroupSizeFull(group.id.clone()));
        }

        match confirmation {
            Confirmation::InviteAccepted => {
                self.notify(ctx, MailTemplate::GroupMemberJoined, group.owner, group, &row.nickname)
                    .await;
            }
            Confirmation::ApplicationAccepted => {
                self.notify(ctx, MailTemplate::GroupMemberJoined, badge, group, &row.nickname)
                    .await;
            }
            Confirmation::ByOperator => {
                self.notify(ctx, MailTemplate::GroupMemberAdded, group.owner, group, &row.nickname)
                    .await;
            }
        }

        self.record(ctx, &group.id, "member.accept", json!({ "badge": badge }))
            .await;
        Ok(())
    }

    /// Create a row for an attendee with no membership yet.
    async fn join(
        &self,
        ctx: &RequestContext,
        actor: Actor,
        group: &room_group::Model,
        badge: i64,
        invitee: Option<Attendee>,
        options: &AddMemberOptions,
    ) -> AppResult<Option<String>> {
        let attendee = match invitee {
            Some(attendee) => attendee,
            None => {
                require_attending(self.registry.as_ref(), ctx, badge).await?;
                self.registry.get_attendee(ctx, badge).await?
            }
        };

        let kind = if actor.is_admin() && options.force {
            Join::Direct
        } else if actor.is_admin() || (actor.is(group.owner) && !actor.is(badge)) {
            Join::Invitation
        } else {
            Join::Application
        };

        let lifted_ban = if self.repo.has_group_ban(&group.id, badge).await? {
            if kind != Join::Direct {
                return Err(AppError::GroupMemberBanned(format!(
                    "attendee {badge} is banned from this group"
                )));
            }
            self.repo
                .list_group_bans(&group.id)
                .await?
                .into_iter()
                .find(|ban| ban.attendee_id == badge)
        } else {
            None
        };

        let max_rows = self.settings.max_group_size as usize;
        let rows = self.repo.list_group_memberships_by_group(&group.id).await?;
        if rows.len() >= max_rows
            || (kind == Join::Direct && confirmed_count(&rows) >= capacity_of(group))
        {
            return Err(AppError::GroupSizeFull(group.id.clone()));
        }

        let mut row = self
            .repo
            .new_empty_group_membership(&group.id, badge, &attendee.nickname);
        row.avatar = attendee.avatar.clone();
        match kind {
            Join::Direct => {
                row.is_invite = false;
                row.invite_type = InviteType::Direct;
            }
            Join::Invitation => {
                row.invite_type = InviteType::Invite;
                row.invite_code = Some(self.id_gen.generate_invite_code());
            }
            Join::Application => row.invite_type = InviteType::Application,
        }
        let code = row.invite_code.clone();

        // the store refuses rows for banned attendees
        if lifted_ban.is_some() {
            self.repo.remove_group_ban(&group.id, badge).await?;
        }
        if let Err(e) = self.repo.add_group_membership(row).await {
            self.restore_ban(lifted_ban).await;
            return Err(e);
        }

        let rows = self.repo.list_group_memberships_by_group(&group.id).await?;
        if rows.len() > max_rows || confirmed_count(&rows) > capacity_of(group) {
            if let Err(e) = self.repo.delete_group_membership(badge).await {
                tracing::error!(group_id = %group.id, badge = badge, error = %e, "Failed to undo membership over capacity");
            }
            self.restore_ban(lifted_ban).await;
            return Err(AppError::GroupSizeFull(group.id.clone()));
        }
        if lifted_ban.is_some() {
            tracing::info!(group_id = %group.id, badge = badge, "Ban lifted by forced add");
        }

        match kind {
            Join::Direct => {
                self.notify(ctx, MailTemplate::GroupMemberAdded, group.owner, group, &attendee.nickname)
                    .await;
            }
            Join::Invitation => {
                let url = self.invite_url(&group.id, badge, code.as_deref().unwrap_or_default());
                self.send(
                    ctx,
                    MailRequest::new(MailTemplate::GroupInvited, &attendee.email)
                        .with("groupname", &group.name)
                        .with("nickname", &attendee.nickname)
                        .with("url", url),
                )
                .await;
            }
            Join::Application => {
                self.notify(ctx, MailTemplate::GroupApplication, group.owner, group, &attendee.nickname)
                    .await;
            }
        }

        let operation = match kind {
            Join::Direct => "member.add",
            Join::Invitation => "member.invite",
            Join::Application => "member.apply",
        };
        self.record(ctx, &group.id, operation, json!({ "badge": badge }))
            .await;
        Ok(code)
    }

    /// Put back a ban lifted for a forced add that did not go through.
    async fn restore_ban(&self, ban: Option<group_ban::Model>) {
        let Some(ban) = ban else {
            return;
        };
        let (group_id, badge) = (ban.group_id.clone(), ban.attendee_id);
        let restored = group_ban::Model {
            id: self.id_gen.generate(),
            updated_at: Utc::now(),
            deleted_at: None,
            ..ban
        };
        if let Err(e) = self.repo.add_group_ban(restored).await {
            tracing::error!(group_id = %group_id, badge = badge, error = %e, "Failed to restore ban");
        }
    }

    /// Kick, leave, withdraw or deny. With `autodeny`, an owner or operator
    /// removing someone else also bans them from the group.
    pub async fn remove_member(
        &self,
        ctx: &RequestContext,
        group_id: &str,
        badge: i64,
        autodeny: bool,
    ) -> AppResult<()> {
        check_group_id(group_id)?;
        check_badge(badge)?;
        let actor = self.actor(ctx, false).await?;
        let group = self.live_group(group_id).await?;

        let is_self = actor.is(badge);
        let is_owner = actor.is(group.owner);
        if !actor.is_admin() && !is_owner && !is_self {
            return Err(AppError::Forbidden(
                "you can only remove yourself or members of groups you own".to_string(),
            ));
        }
        if badge == group.owner {
            return Err(AppError::Forbidden(
                "the owner cannot be removed, transfer ownership or delete the group".to_string(),
            ));
        }

        let row = self
            .repo
            .get_group_membership_by_badge(badge)
            .await?
            .ok_or_else(|| {
                AppError::GroupMemberNotFound(format!("attendee {badge} is not in a group"))
            })?;
        if row.group_id != group.id {
            return Err(AppError::GroupMemberConflict(format!(
                "attendee {badge} is in another group"
            )));
        }

        self.repo.delete_group_membership(badge).await?;

        let ban = autodeny && !is_self && (actor.is_admin() || is_owner);
        if ban {
            let now = Utc::now();
            self.repo
                .add_group_ban(group_ban::Model {
                    id: self.id_gen.generate(),
                    group_id: group.id.clone(),
                    attendee_id: badge,
                    flags: String::new(),
                    comments: format!("banned by {}", ctx.caller.requested_by()),
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                })
                .await?;
        }

        if actor.is_admin() {
            self.notify(ctx, MailTemplate::GroupMemberRemoved, group.owner, &group, &row.nickname)
                .await;
            self.notify(ctx, MailTemplate::GroupMemberKicked, badge, &group, &row.nickname)
                .await;
        } else if is_self {
            self.notify(ctx, MailTemplate::GroupMemberLeft, group.owner, &group, &row.nickname)
                .await;
        } else {
            self.notify(ctx, MailTemplate::GroupMemberKicked, badge, &group, &row.nickname)
                .await;
        }

        self.record(
            ctx,
            &group.id,
            "member.remove",
            json!({ "badge": badge, "banned": ban }),
        )
        .await;
        Ok(())
    }

    // ==================== Helper Methods ====================

    /// Resolve the caller. Attendees are looked up by their own badge.
    async fn actor(&self, ctx: &RequestContext, must_attend: bool) -> AppResult<Actor> {
        require_login(&ctx.caller)?;
        if ctx.caller.is_admin() {
            return Ok(Actor::Admin);
        }

        let me = own_badge(self.registry.as_ref(), ctx).await?;
        if must_attend {
            require_attending(self.registry.as_ref(), ctx, me).await?;
        }
        Ok(Actor::Attendee(me))
    }

    fn require_owner_or_admin(actor: Actor, group: &room_group::Model) -> AppResult<()> {
        if actor.is_admin() || actor.is(group.owner) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "only the owner may change this group".to_string(),
            ))
        }
    }

    async fn live_group(&self, id: &str) -> AppResult<room_group::Model> {
        let group = self.repo.get_group_by_id(id).await?;
        if group.is_deleted() {
            return Err(AppError::GroupNotFound(id.to_string()));
        }
        Ok(group)
    }

    fn check_input(&self, input: &GroupInput) -> AppResult<()> {
        let mut details = match input.validate() {
            Ok(()) => Details::new(),
            Err(e) => Details::from(&e),
        };

        if input.name.trim() != input.name {
            details.add("name", "name must not start or end with whitespace");
        }
        for flag in &input.flags {
            if !self.settings.flags.contains(flag) {
                details.add("flags", format!("no such flag '{flag}'"));
            }
        }
        let max = i64::from(self.settings.max_group_size);
        if input.maximum_size < 0 || input.maximum_size > max {
            details.add(
                "maximum_size",
                format!("maximum_size must be between 1 and {max}"),
            );
        }
        if input.owner < 0 {
            details.add("owner", "owner must be a positive badge number");
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(AppError::GroupDataInvalid(details))
        }
    }

    async fn render(
        &self,
        group: room_group::Model,
        access: Access,
        viewer: Option<i64>,
    ) -> AppResult<GroupView> {
        let rows = self.repo.list_group_memberships_by_group(&group.id).await?;
        let visible = |m: &&group_member::Model| access != Access::Public || Some(m.attendee_id) == viewer;

        let members = rows
            .iter()
            .filter(|m| !m.is_invite)
            .filter(visible)
            .map(MemberView::from)
            .collect();
        let invites = rows
            .iter()
            .filter(|m| m.is_invite)
            .filter(visible)
            .map(MemberView::from)
            .collect();
        let bans = if access == Access::Admin {
            let bans = self.repo.list_group_bans(&group.id).await?;
            Some(bans.into_iter().map(BanView::from).collect())
        } else {
            None
        };

        let full = access != Access::Public;
        Ok(GroupView {
            flags: split_flags(&group.flags),
            comments: full.then_some(group.comments),
            maximum_size: group.maximum_size,
            owner: full.then_some(group.owner),
            member_count: confirmed_count(&rows),
            members,
            invites,
            bans,
            id: group.id,
            name: group.name,
        })
    }

    fn invite_url(&self, group_id: &str, badge: i64, code: &str) -> String {
        match Url::parse(&self.settings.join_link_url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("group_id", group_id)
                    .append_pair("badge", &badge.to_string())
                    .append_pair("code", code);
                url.to_string()
            }
            Err(_) => format!(
                "{}?group_id={}&badge={badge}&code={}",
                self.settings.join_link_url,
                urlencoding::encode(group_id),
                urlencoding::encode(code)
            ),
        }
    }

    /// Mail `template` to the attendee with `badge`. Failures are logged only.
    async fn notify(
        &self,
        ctx: &RequestContext,
        template: MailTemplate,
        badge: i64,
        group: &room_group::Model,
        member_nickname: &str,
    ) {
        let recipient = match self.registry.get_attendee(ctx, badge).await {
            Ok(attendee) => attendee,
            Err(e) => {
                tracing::warn!(badge = badge, cid = template.cid(), error = %e, "Mail recipient lookup failed");
                return;
            }
        };

        let request = MailRequest::new(template, recipient.email)
            .with("groupname", &group.name)
            .with("nickname", recipient.nickname)
            .with("membername", member_nickname);
        self.send(ctx, request).await;
    }

    async fn send(&self, ctx: &RequestContext, request: MailRequest) {
        let cid = request.cid.clone();
        if let Err(e) = self.mailer.send(ctx, request).await {
            tracing::warn!(cid = %cid, error = %e, "Mail delivery failed");
        }
    }

    async fn record(
        &self,
        ctx: &RequestContext,
        group_id: &str,
        operation: &str,
        diff: serde_json::Value,
    ) {
        let entry = HistoryEntry {
            entity: "group".to_string(),
            entity_id: group_id.to_string(),
            operation: operation.to_string(),
            requested_by: ctx.caller.requested_by(),
            diff,
        };
        if let Err(e) = self.repo.record_history(entry).await {
            tracing::error!(group_id = %group_id, operation = operation, error = %e, "Failed to record history");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use roomsvc_db::{GroupStore, InMemoryRepository, Repository};

    use super::*;
    use crate::services::attendee::AttendeeStatus;
    use crate::testing::{
        FakeAttendeeRegistry, RacingRepository, RecordingMailService, anonymous_ctx, machine_ctx,
        operator_ctx, user_ctx,
    };

    struct Fixture<R = InMemoryRepository> {
        repo: Arc<R>,
        registry: Arc<FakeAttendeeRegistry>,
        mailer: Arc<RecordingMailService>,
        service: GroupService,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(InMemoryRepository::new()))
    }

    fn fixture_on<R: Repository + 'static>(repo: Arc<R>) -> Fixture<R> {
        let registry = Arc::new(
            FakeAttendeeRegistry::new()
                .with_attendee(1, "Operator", AttendeeStatus::Paid)
                .with_attendee(42, "Kitty", AttendeeStatus::Paid)
                .with_attendee(43, "Tiger", AttendeeStatus::Approved)
                .with_attendee(84, "Panther", AttendeeStatus::CheckedIn)
                .with_attendee(85, "Lynx", AttendeeStatus::PartiallyPaid)
                .with_attendee(86, "Ocelot", AttendeeStatus::Cancelled)
                .with_badges("1", &[1])
                .with_badges("101", &[42])
                .with_badges("102", &[43])
                .with_badges("103", &[84])
                .with_badges("104", &[85])
                .with_badges("105", &[86]),
        );
        let mailer = Arc::new(RecordingMailService::new());
        let settings = GroupSettings {
            max_group_size: 6,
            default_group_size: 6,
            flags: vec!["public".to_string()],
            join_link_url: "https://reg.example.com/room/join".to_string(),
        };
        let service = GroupService::new(repo.clone(), registry.clone(), mailer.clone(), settings);
        Fixture {
            repo,
            registry,
            mailer,
            service,
        }
    }

    fn kittens() -> GroupInput {
        GroupInput {
            name: "kittens".to_string(),
            flags: vec!["public".to_string()],
            comments: "hi".to_string(),
            ..GroupInput::default()
        }
    }

    fn invite(nickname: &str) -> AddMemberOptions {
        AddMemberOptions {
            nickname: Some(nickname.to_string()),
            ..AddMemberOptions::default()
        }
    }

    fn with_code(code: &str) -> AddMemberOptions {
        AddMemberOptions {
            code: Some(code.to_string()),
            ..AddMemberOptions::default()
        }
    }

    fn forced() -> AddMemberOptions {
        AddMemberOptions {
            force: true,
            ..AddMemberOptions::default()
        }
    }

    fn badges(members: &[MemberView]) -> Vec<i64> {
        members.iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn test_create_and_read_group() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        assert!(is_valid_uuid(&id));

        let view = f.service.get_group(&user_ctx("101"), &id).await.unwrap();
        assert_eq!(view.name, "kittens");
        assert_eq!(view.owner, Some(42));
        assert_eq!(badges(&view.members), vec![42]);
        assert!(view.invites.is_empty());
        assert_eq!(view.flags, vec!["public"]);
        assert_eq!(view.comments.as_deref(), Some("hi"));
        assert_eq!(view.maximum_size, 6);
        assert!(view.bans.is_none());

        let history = f.repo.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, "create");
        assert_eq!(history[0].requested_by, "user:101");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let f = fixture();
        f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let input = GroupInput {
            owner: 42,
            ..kittens()
        };
        let err = f.service.create_group(&operator_ctx("1"), input).await.unwrap_err();
        assert_eq!(err.message(), "group.data.duplicate");
    }

    #[tokio::test]
    async fn test_create_rejects_owner_in_another_group() {
        let f = fixture();
        f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let input = GroupInput {
            name: "puppies".to_string(),
            owner: 42,
            ..GroupInput::default()
        };
        let err = f.service.create_group(&machine_ctx(), input).await.unwrap_err();
        assert_eq!(err.message(), "group.member.conflict");
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture();
        let input = GroupInput {
            name: String::new(),
            flags: vec!["vip".to_string()],
            maximum_size: 7,
            ..GroupInput::default()
        };
        let err = f.service.create_group(&user_ctx("101"), input).await.unwrap_err();
        let AppError::GroupDataInvalid(details) = err else {
            panic!("expected group.data.invalid");
        };
        assert!(details.get("name").is_some());
        assert!(details.get("flags").is_some());
        assert!(details.get("maximum_size").is_some());

        let err = f.service.create_group(&machine_ctx(), kittens()).await.unwrap_err();
        assert_eq!(err.message(), "group.data.invalid");
    }

    #[tokio::test]
    async fn test_create_requires_login_and_attendance() {
        let f = fixture();
        let err = f.service.create_group(&anonymous_ctx(), kittens()).await.unwrap_err();
        assert_eq!(err.message(), "auth.unauthorized");

        let err = f.service.create_group(&user_ctx("105"), kittens()).await.unwrap_err();
        assert_eq!(err.message(), "attendee.status.not.attending");

        let err = f.service.create_group(&user_ctx("999"), kittens()).await.unwrap_err();
        assert_eq!(err.message(), "attendee.notfound");

        let input = GroupInput {
            owner: 43,
            ..kittens()
        };
        let err = f.service.create_group(&user_ctx("101"), input).await.unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");
    }

    #[tokio::test]
    async fn test_invite_and_accept() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let code = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.mailer.sent_to("panther@example.com"), vec!["group-invited"]);
        let mail = &f.mailer.sent()[0];
        assert!(mail.variables["url"].contains(&format!("code={code}")));

        let view = f.service.get_group(&user_ctx("101"), &id).await.unwrap();
        assert_eq!(badges(&view.invites), vec![84]);

        f.mailer.clear();
        let accepted = f
            .service
            .add_member(&user_ctx("103"), &id, 84, with_code(&code))
            .await
            .unwrap();
        assert!(accepted.is_none());
        assert_eq!(f.mailer.sent_to("kitty@example.com"), vec!["group-member-joined"]);
        assert_eq!(f.mailer.sent().len(), 1);

        let view = f.service.get_group(&user_ctx("103"), &id).await.unwrap();
        assert_eq!(badges(&view.members), vec![42, 84]);
        assert!(view.invites.is_empty());

        // the code is spent
        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 84, with_code(&code))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.duplicate");
    }

    #[tokio::test]
    async fn test_accept_requires_matching_code() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap();

        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 84, with_code("0000"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 84, AddMemberOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        // owner re-inviting
        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.duplicate");
    }

    #[tokio::test]
    async fn test_invite_nickname_mismatch_creates_nothing() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("panther"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.invite.mismatch");

        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 84, AddMemberOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.invite.mismatch");

        assert!(f.repo.get_group_membership_by_badge(84).await.unwrap().is_none());
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invite_reveals_nothing_without_nickname() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let input = GroupInput {
            name: "puppies".to_string(),
            ..GroupInput::default()
        };
        f.service.create_group(&user_ctx("103"), input).await.unwrap();

        // unknown badge, cancelled registration, member of another group
        for (badge, nickname) in [(999, "Nobody"), (86, "Nobody"), (84, "Nobody")] {
            let err = f
                .service
                .add_member(&user_ctx("101"), &id, badge, invite(nickname))
                .await
                .unwrap_err();
            assert_eq!(err.message(), "group.invite.mismatch", "badge {badge}");
        }

        // a correct nickname still does not get a cancelled registration in
        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 86, invite("Ocelot"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.invite.mismatch");
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_apply_and_owner_accepts() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let code = f
            .service
            .add_member(&user_ctx("102"), &id, 43, AddMemberOptions::default())
            .await
            .unwrap();
        assert!(code.is_none());
        assert_eq!(f.mailer.sent_to("kitty@example.com"), vec!["group-application"]);

        // applicant sees the masked view
        let view = f.service.get_group(&user_ctx("102"), &id).await.unwrap();
        assert!(view.owner.is_none());
        assert!(view.comments.is_none());
        assert!(view.members.is_empty());
        assert_eq!(badges(&view.invites), vec![43]);
        assert_eq!(view.member_count, 1);

        let err = f
            .service
            .add_member(&user_ctx("102"), &id, 43, AddMemberOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.duplicate");

        f.service
            .add_member(&user_ctx("101"), &id, 43, AddMemberOptions::default())
            .await
            .unwrap();
        assert_eq!(f.mailer.sent_to("tiger@example.com"), vec!["group-member-joined"]);

        let view = f.service.get_group(&user_ctx("102"), &id).await.unwrap();
        assert_eq!(badges(&view.members), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_member_in_other_group_conflicts() {
        let f = fixture();
        let g1 = f.service.create_group(&user_ctx("103"), kittens()).await.unwrap();
        let input = GroupInput {
            name: "puppies".to_string(),
            ..GroupInput::default()
        };
        let g2 = f.service.create_group(&user_ctx("101"), input).await.unwrap();

        let err = f
            .service
            .add_member(&user_ctx("101"), &g2, 84, invite("Panther"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.conflict");
        assert!(f.mailer.sent().is_empty());

        let view = f.service.get_group(&operator_ctx("1"), &g1).await.unwrap();
        assert_eq!(badges(&view.members), vec![84]);
        let view = f.service.get_group(&operator_ctx("1"), &g2).await.unwrap();
        assert_eq!(badges(&view.members), vec![42]);
        assert!(view.invites.is_empty());
    }

    #[tokio::test]
    async fn test_autodeny_ban_and_forced_add() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();

        f.service
            .remove_member(&operator_ctx("1"), &id, 43, true)
            .await
            .unwrap();
        assert!(f.repo.has_group_ban(&id, 43).await.unwrap());

        let err = f
            .service
            .add_member(&user_ctx("102"), &id, 43, AddMemberOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.banned");
        assert!(f.repo.get_group_membership_by_badge(43).await.unwrap().is_none());

        let view = f.service.get_group(&operator_ctx("1"), &id).await.unwrap();
        assert_eq!(view.bans.as_ref().map(Vec::len), Some(1));

        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();
        assert!(!f.repo.has_group_ban(&id, 43).await.unwrap());
        let view = f.service.get_group(&operator_ctx("1"), &id).await.unwrap();
        assert_eq!(badges(&view.members), vec![42, 43]);
        assert_eq!(view.bans, Some(vec![]));
    }

    #[tokio::test]
    async fn test_failed_forced_add_keeps_ban() {
        let f = fixture();
        let input = GroupInput {
            maximum_size: 2,
            ..kittens()
        };
        let id = f.service.create_group(&user_ctx("101"), input).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap();
        f.service
            .remove_member(&operator_ctx("1"), &id, 84, true)
            .await
            .unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();

        let err = f
            .service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");
        assert!(f.repo.has_group_ban(&id, 84).await.unwrap());
        assert!(f.repo.get_group_membership_by_badge(84).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ban_restored_when_forced_add_overfills() {
        let f = fixture_on(Arc::new(RacingRepository::new()));
        let input = GroupInput {
            maximum_size: 2,
            ..kittens()
        };
        let id = f.service.create_group(&user_ctx("101"), input).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap();
        f.service
            .remove_member(&operator_ctx("1"), &id, 84, true)
            .await
            .unwrap();

        f.repo.race_group(&id, 43);
        let err = f
            .service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");
        assert!(f.repo.get_group_membership_by_badge(84).await.unwrap().is_none());
        assert!(f.repo.has_group_ban(&id, 84).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_is_operator_only() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 43, forced())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        // strangers cannot invite into someone else's group
        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 43, invite("Tiger"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");
    }

    #[tokio::test]
    async fn test_operator_invite_skips_nickname_check() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let code = f
            .service
            .add_member(&operator_ctx("1"), &id, 84, AddMemberOptions::default())
            .await
            .unwrap();
        assert!(code.is_some());

        // and may confirm any pending row
        f.service
            .add_member(&machine_ctx(), &id, 84, AddMemberOptions::default())
            .await
            .unwrap();
        assert_eq!(
            f.mailer.sent_to("kitty@example.com"),
            vec!["group-member-added"]
        );
    }

    #[tokio::test]
    async fn test_group_capacity() {
        let f = fixture();
        let input = GroupInput {
            maximum_size: 2,
            ..kittens()
        };
        let id = f.service.create_group(&user_ctx("101"), input).await.unwrap();

        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();
        let err = f
            .service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");

        // an invitation may be pending, but not accepted
        let code = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap()
            .unwrap();
        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 84, with_code(&code))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");
        let row = f.repo.get_group_membership_by_badge(84).await.unwrap().unwrap();
        assert!(row.is_invite);
    }

    #[tokio::test]
    async fn test_join_undone_when_group_overfills() {
        let f = fixture_on(Arc::new(RacingRepository::new()));
        let input = GroupInput {
            maximum_size: 2,
            ..kittens()
        };
        let id = f.service.create_group(&user_ctx("101"), input).await.unwrap();

        f.repo.race_group(&id, 84);
        let err = f
            .service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");
        assert!(f.repo.get_group_membership_by_badge(43).await.unwrap().is_none());
        assert!(f.mailer.sent().is_empty());

        let rows = f.repo.list_group_memberships_by_group(&id).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.attendee_id).collect::<Vec<_>>(), vec![42, 84]);
    }

    #[tokio::test]
    async fn test_accept_undone_when_group_overfills() {
        let f = fixture_on(Arc::new(RacingRepository::new()));
        let input = GroupInput {
            maximum_size: 2,
            ..kittens()
        };
        let id = f.service.create_group(&user_ctx("101"), input).await.unwrap();
        let code = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap()
            .unwrap();
        f.mailer.clear();

        f.repo.race_group(&id, 43);
        let err = f
            .service
            .add_member(&user_ctx("103"), &id, 84, with_code(&code))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.size.full");
        assert!(f.mailer.sent().is_empty());

        let row = f.repo.get_group_membership_by_badge(84).await.unwrap().unwrap();
        assert!(row.is_invite);
        assert_eq!(row.invite_code.as_deref(), Some(code.as_str()));
    }

    #[tokio::test]
    async fn test_update_group() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();

        let input = GroupInput {
            maximum_size: 1,
            ..kittens()
        };
        let err = f.service.update_group(&user_ctx("101"), &id, input).await.unwrap_err();
        assert_eq!(err.message(), "group.size.too.small");

        let input = GroupInput {
            owner: 84,
            ..kittens()
        };
        let err = f.service.update_group(&user_ctx("101"), &id, input).await.unwrap_err();
        assert_eq!(err.message(), "group.data.invalid");

        let err = f
            .service
            .update_group(&user_ctx("102"), &id, kittens())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        let input = GroupInput {
            name: "big cats".to_string(),
            maximum_size: 4,
            owner: 43,
            ..kittens()
        };
        f.service.update_group(&user_ctx("101"), &id, input).await.unwrap();

        let view = f.service.get_group(&user_ctx("102"), &id).await.unwrap();
        assert_eq!(view.name, "big cats");
        assert_eq!(view.maximum_size, 4);
        assert_eq!(view.owner, Some(43));
    }

    #[tokio::test]
    async fn test_remove_member() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 84, forced())
            .await
            .unwrap();
        f.mailer.clear();

        let err = f
            .service
            .remove_member(&operator_ctx("1"), &id, 42, false)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        let err = f
            .service
            .remove_member(&user_ctx("102"), &id, 84, false)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        // leave
        f.service
            .remove_member(&user_ctx("102"), &id, 43, true)
            .await
            .unwrap();
        assert_eq!(f.mailer.sent_to("kitty@example.com"), vec!["group-member-left"]);
        assert!(!f.repo.has_group_ban(&id, 43).await.unwrap());

        let err = f
            .service
            .remove_member(&user_ctx("102"), &id, 43, false)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.member.notfound");

        // kick with ban
        f.service
            .remove_member(&user_ctx("101"), &id, 84, true)
            .await
            .unwrap();
        assert_eq!(f.mailer.sent_to("panther@example.com"), vec!["group-member-kicked"]);
        assert!(f.repo.has_group_ban(&id, 84).await.unwrap());
    }

    #[tokio::test]
    async fn test_stranger_remove_is_forbidden_before_lookup() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let input = GroupInput {
            name: "puppies".to_string(),
            ..GroupInput::default()
        };
        f.service.create_group(&user_ctx("103"), input).await.unwrap();

        // 84 owns another group, 43 is in none
        for badge in [84, 43] {
            let err = f
                .service
                .remove_member(&user_ctx("104"), &id, badge, false)
                .await
                .unwrap_err();
            assert_eq!(err.message(), "auth.forbidden", "badge {badge}");
        }
    }

    #[tokio::test]
    async fn test_non_attending_member_can_leave() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();
        f.registry.set_status(43, AttendeeStatus::Cancelled);

        let err = f.service.get_group(&user_ctx("102"), &id).await.unwrap_err();
        assert_eq!(err.message(), "attendee.status.not.attending");

        f.service
            .remove_member(&user_ctx("102"), &id, 43, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_group_releases_members() {
        let f = fixture();
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &id, 43, forced())
            .await
            .unwrap();

        let err = f.service.delete_group(&user_ctx("102"), &id).await.unwrap_err();
        assert_eq!(err.message(), "auth.forbidden");

        f.service.delete_group(&user_ctx("101"), &id).await.unwrap();
        let err = f.service.get_group(&user_ctx("101"), &id).await.unwrap_err();
        assert_eq!(err.message(), "group.id.notfound");
        assert!(f.repo.get_group_membership_by_badge(43).await.unwrap().is_none());

        // the name is free again
        f.service.create_group(&user_ctx("102"), kittens()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_groups() {
        let f = fixture();
        let g1 = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let input = GroupInput {
            name: "puppies".to_string(),
            ..GroupInput::default()
        };
        f.service.create_group(&user_ctx("102"), input).await.unwrap();
        f.service
            .add_member(&operator_ctx("1"), &g1, 84, forced())
            .await
            .unwrap();

        let all = f.service.list_groups(&machine_ctx(), GroupQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let query = GroupQuery {
            min_size: 2,
            ..GroupQuery::default()
        };
        let big = f.service.list_groups(&machine_ctx(), query).await.unwrap();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].id, g1);

        // attendees only ever see their own group
        let query = GroupQuery {
            member_ids: vec![43],
            ..GroupQuery::default()
        };
        let mine = f.service.list_groups(&user_ctx("103"), query).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, g1);
        assert!(mine[0].bans.is_none());
    }

    #[tokio::test]
    async fn test_find_my_group() {
        let f = fixture();
        let err = f.service.find_my_group(&user_ctx("101")).await.unwrap_err();
        assert_eq!(err.message(), "group.member.notfound");

        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let mine = f.service.find_my_group(&user_ctx("101")).await.unwrap();
        assert_eq!(mine.id, id);
        assert_eq!(mine.owner, Some(42));

        f.service
            .add_member(&user_ctx("104"), &id, 85, AddMemberOptions::default())
            .await
            .unwrap();
        let pending = f.service.find_my_group(&user_ctx("104")).await.unwrap();
        assert!(pending.owner.is_none());
        assert_eq!(badges(&pending.invites), vec![85]);
    }

    #[tokio::test]
    async fn test_mail_failure_does_not_fail_operation() {
        let f = fixture();
        f.mailer.set_failing(true);
        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();

        let code = f
            .service
            .add_member(&user_ctx("101"), &id, 84, invite("Panther"))
            .await
            .unwrap();
        assert!(code.is_some());
    }

    #[tokio::test]
    async fn test_invalid_ids() {
        let f = fixture();
        let err = f.service.get_group(&user_ctx("101"), "kittens").await.unwrap_err();
        assert_eq!(err.message(), "group.id.invalid");

        let id = f.service.create_group(&user_ctx("101"), kittens()).await.unwrap();
        let err = f
            .service
            .add_member(&user_ctx("101"), &id, 0, AddMemberOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "request.parse.failed");

        let err = f
            .service
            .get_group(&user_ctx("101"), "7a7a9b0c-6e0f-4c8b-9a57-2f1f7b6f2f10")
            .await
            .unwrap_err();
        assert_eq!(err.message(), "group.id.notfound");
    }
}
