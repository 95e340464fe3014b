//! Room service: lodging units and who sleeps where.
//!
//! Rooms are managed by operators only. Attendees can look up their own room
//! once it carries the final flag.

use std::sync::Arc;

use chrono::Utc;
use roomsvc_common::config::ServiceConfig;
use roomsvc_common::{AppError, AppResult, Details, IdGenerator, RequestContext, is_valid_uuid};
use roomsvc_db::entities::{join_flags, room, room_member, split_flags};
use roomsvc_db::{FindCriteria, HistoryEntry, SharedRepository, UNBOUNDED};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use super::attendee::{SharedAttendeeRegistry, own_badge, require_attending};
use super::auth::require_login;

/// Flag that makes a room visible to its occupants.
pub const FINAL_FLAG: &str = "final";

/// Limits and allow-lists for rooms.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_room_size: u32,
    pub flags: Vec<String>,
}

impl RoomSettings {
    #[must_use]
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            max_room_size: service.max_room_size,
            flags: service.room_flags.clone(),
        }
    }
}

/// Input for creating or replacing a room.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct RoomInput {
    #[validate(length(min = 1, max = 50, message = "name must be between 1 and 50 characters"))]
    pub name: String,
    pub flags: Vec<String>,
    #[validate(length(max = 4096, message = "comments must be at most 4096 characters"))]
    pub comments: String,
    pub size: i64,
}

/// Filter for [`RoomService::list_rooms`].
#[derive(Debug, Clone)]
pub struct RoomQuery {
    pub occupant_ids: Vec<i64>,
    pub min_size: u32,
    pub max_size: i64,
}

impl Default for RoomQuery {
    fn default() -> Self {
        Self {
            occupant_ids: Vec::new(),
            min_size: 0,
            max_size: UNBOUNDED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupantView {
    pub id: i64,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub flags: Vec<String>,
}

impl From<room_member::Model> for OccupantView {
    fn from(m: room_member::Model) -> Self {
        Self {
            id: m.attendee_id,
            flags: split_flags(&m.flags),
            nickname: m.nickname,
            avatar: m.avatar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    pub id: String,
    pub name: String,
    pub flags: Vec<String>,
    pub comments: String,
    pub size: i32,
    pub occupants: Vec<OccupantView>,
}

fn check_room_id(id: &str) -> AppResult<()> {
    if is_valid_uuid(id) {
        Ok(())
    } else {
        Err(AppError::RoomIdInvalid(format!("'{id}' is not a valid room id")))
    }
}

fn require_admin(ctx: &RequestContext) -> AppResult<()> {
    require_login(&ctx.caller)?;
    if ctx.caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "this operation is restricted to operators".to_string(),
        ))
    }
}

/// Service for rooms and room occupancy.
#[derive(Clone)]
pub struct RoomService {
    repo: SharedRepository,
    registry: SharedAttendeeRegistry,
    settings: Arc<RoomSettings>,
    id_gen: IdGenerator,
}

impl RoomService {
    /// Create a new room service.
    #[must_use]
    pub fn new(
        repo: SharedRepository,
        registry: SharedAttendeeRegistry,
        settings: RoomSettings,
    ) -> Self {
        Self {
            repo,
            registry,
            settings: Arc::new(settings),
            id_gen: IdGenerator::new(),
        }
    }

    // ==================== Rooms ====================

    /// Create a room. Returns the new id.
    pub async fn create_room(&self, ctx: &RequestContext, input: RoomInput) -> AppResult<String> {
        require_admin(ctx)?;
        self.check_input(&input)?;

        let now = Utc::now();
        let room = room::Model {
            id: self.id_gen.generate(),
            name: input.name,
            flags: join_flags(&input.flags),
            comments: input.comments,
            size: input.size as i32,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let id = room.id.clone();
        self.repo.add_room(room.clone()).await?;

        self.record(ctx, &id, "create", json!({ "room": room })).await;
        tracing::info!(room_id = %id, "Room created");
        Ok(id)
    }

    /// Read a room with its occupants.
    pub async fn get_room(&self, ctx: &RequestContext, id: &str) -> AppResult<RoomView> {
        check_room_id(id)?;
        require_admin(ctx)?;
        let room = self.live_room(id).await?;
        self.render(room).await
    }

    /// Replace a room's name, flags, comments and size.
    pub async fn update_room(&self, ctx: &RequestContext, id: &str, input: RoomInput) -> AppResult<()> {
        check_room_id(id)?;
        require_admin(ctx)?;
        let current = self.live_room(id).await?;
        self.check_input(&input)?;

        let updated = room::Model {
            name: input.name,
            flags: join_flags(&input.flags),
            comments: input.comments,
            size: input.size as i32,
            ..current.clone()
        };
        self.repo.update_room(updated.clone()).await?;

        self.record(ctx, id, "update", json!({ "old": current, "new": updated }))
            .await;
        Ok(())
    }

    /// Soft-delete an empty room.
    pub async fn delete_room(&self, ctx: &RequestContext, id: &str) -> AppResult<()> {
        check_room_id(id)?;
        require_admin(ctx)?;
        self.repo.soft_delete_room(id).await?;

        self.record(ctx, id, "delete", json!({})).await;
        tracing::info!(room_id = %id, "Room deleted");
        Ok(())
    }

    /// Rooms matching `query`.
    pub async fn list_rooms(&self, ctx: &RequestContext, query: RoomQuery) -> AppResult<Vec<RoomView>> {
        require_admin(ctx)?;

        let criteria = FindCriteria {
            min_occupancy: query.min_size,
            max_occupancy: query.max_size,
            any_of_badges: query.occupant_ids,
            name: None,
        };
        let ids = self.repo.find_rooms(&criteria).await?;

        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            let room = self.repo.get_room_by_id(&id).await?;
            views.push(self.render(room).await?);
        }
        Ok(views)
    }

    /// The caller's room, once it is final.
    pub async fn get_my_room(&self, ctx: &RequestContext) -> AppResult<RoomView> {
        require_login(&ctx.caller)?;
        let me = own_badge(self.registry.as_ref(), ctx).await?;
        require_attending(self.registry.as_ref(), ctx, me).await?;

        let not_assigned = || AppError::RoomOccupantNotFound("you are not in a room".to_string());
        let occupancy = self
            .repo
            .get_room_membership_by_badge(me)
            .await?
            .ok_or_else(not_assigned)?;

        let room = self.repo.get_room_by_id(&occupancy.room_id).await?;
        if room.is_deleted() || !room.has_flag(FINAL_FLAG) {
            return Err(not_assigned());
        }
        self.render(room).await
    }

    // ==================== Occupants ====================

    /// Put an attending attendee into a room.
    pub async fn add_occupant(&self, ctx: &RequestContext, room_id: &str, badge: i64) -> AppResult<()> {
        check_room_id(room_id)?;
        require_admin(ctx)?;
        if badge <= 0 {
            return Err(AppError::RequestParseFailed(
                "badge number must be a positive integer".to_string(),
            ));
        }
        let room = self.live_room(room_id).await?;

        require_attending(self.registry.as_ref(), ctx, badge).await?;
        let attendee = self.registry.get_attendee(ctx, badge).await?;

        let mut occupant = self
            .repo
            .new_empty_room_membership(&room.id, badge, &attendee.nickname);
        occupant.avatar = attendee.avatar;
        self.repo.add_room_membership(occupant).await?;

        let occupants = self.repo.list_room_memberships_by_room(&room.id).await?;
        if occupants.len() > room.size.max(0) as usize {
            if let Err(e) = self.repo.delete_room_membership(badge).await {
                tracing::error!(room_id = %room.id, badge = badge, error = %e, "Failed to undo occupancy over capacity");
            }
            return Err(AppError::RoomSizeFull(room.id));
        }

        self.record(ctx, &room.id, "occupant.add", json!({ "badge": badge }))
            .await;
        Ok(())
    }

    /// Take an attendee out of a room, regardless of their registration status.
    pub async fn remove_occupant(&self, ctx: &RequestContext, room_id: &str, badge: i64) -> AppResult<()> {
        check_room_id(room_id)?;
        require_admin(ctx)?;
        let room = self.live_room(room_id).await?;

        let occupancy = self
            .repo
            .get_room_membership_by_badge(badge)
            .await?
            .ok_or_else(|| AppError::RoomOccupantNotFound(format!("attendee {badge} is not in a room")))?;
        if occupancy.room_id != room.id {
            return Err(AppError::RoomOccupantConflict(format!(
                "attendee {badge} is in another room"
            )));
        }

        self.repo.delete_room_membership(badge).await?;

        self.record(ctx, &room.id, "occupant.remove", json!({ "badge": badge }))
            .await;
        Ok(())
    }

    // ==================== Helper Methods ====================

    async fn live_room(&self, id: &str) -> AppResult<room::Model> {
        let room = self.repo.get_room_by_id(id).await?;
        if room.is_deleted() {
            return Err(AppError::RoomNotFound(id.to_string()));
        }
        Ok(room)
    }

    fn check_input(&self, input: &RoomInput) -> AppResult<()> {
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
        let max = i64::from(self.settings.max_room_size);
        if input.size < 1 || input.size > max {
            details.add("size", format!("size must be between 1 and {max}"));
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(AppError::RoomDataInvalid(details))
        }
    }

    async fn render(&self, room: room::Model) -> AppResult<RoomView> {
        let occupants = self
            .repo
            .list_room_memberships_by_room(&room.id)
            .await?
            .into_iter()
            .map(OccupantView::from)
            .collect();

        Ok(RoomView {
            flags: split_flags(&room.flags),
            id: room.id,
            name: room.name,
            comments: room.comments,
            size: room.size,
            occupants,
        })
    }

    async fn record(&self, ctx: &RequestContext, room_id: &str, operation: &str, diff: serde_json::Value) {
        let entry = HistoryEntry {
            entity: "room".to_string(),
            entity_id: room_id.to_string(),
            operation: operation.to_string(),
            requested_by: ctx.caller.requested_by(),
            diff,
        };
        if let Err(e) = self.repo.record_history(entry).await {
            tracing::error!(room_id = %room_id, operation = operation, error = %e, "Failed to record history");
        }
    }
}
