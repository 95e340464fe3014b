//! Repository interface and its back-ends.
//!
//! [`Repository`] is the single storage interface the cores depend on. It is
//! split into [`GroupStore`], [`RoomStore`] and [`HistoryStore`] so each
//! back-end can implement the parts in separate modules.
//!
//! Every write is atomic with respect to the invariants it touches: one
//! membership row per attendee, name uniqueness among live rows, and no
//! membership next to a live ban.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use roomsvc_common::AppResult;

use crate::entities::group_member::InviteType;
use crate::entities::{group_ban, group_member, room, room_group, room_member};

pub mod memory;
pub mod sql;

pub use memory::InMemoryRepository;
pub use sql::SqlRepository;

/// Shared handle to the configured repository.
pub type SharedRepository = Arc<dyn Repository>;

/// `max_occupancy` value that disables the upper bound.
pub const UNBOUNDED: i64 = -1;

/// Filter for [`GroupStore::find_groups`] and [`RoomStore::find_rooms`].
///
/// Occupancy counts confirmed group members or room occupants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindCriteria {
    /// Lower occupancy bound, inclusive.
    pub min_occupancy: u32,
    /// Upper occupancy bound, inclusive; [`UNBOUNDED`] disables it.
    pub max_occupancy: i64,
    /// Matches when at least one of these badges is a member; empty matches all.
    pub any_of_badges: Vec<i64>,
    /// Exact name match.
    pub name: Option<String>,
}

impl Default for FindCriteria {
    fn default() -> Self {
        Self {
            min_occupancy: 0,
            max_occupancy: UNBOUNDED,
            any_of_badges: Vec::new(),
            name: None,
        }
    }
}

impl FindCriteria {
    /// Whether an entity with `name` and the given members matches.
    #[must_use]
    pub fn matches(&self, name: &str, members: &[i64]) -> bool {
        if self.name.as_deref().is_some_and(|wanted| wanted != name) {
            return false;
        }

        let occupancy = members.len() as i64;
        if occupancy < i64::from(self.min_occupancy) {
            return false;
        }
        if self.max_occupancy >= 0 && occupancy > self.max_occupancy {
            return false;
        }

        self.any_of_badges.is_empty() || members.iter().any(|b| self.any_of_badges.contains(b))
    }
}

/// A history record to append.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Kind of entity, e.g. `group`.
    pub entity: String,
    /// Id of the changed entity.
    pub entity_id: String,
    /// Operation name.
    pub operation: String,
    /// Who asked for the change.
    pub requested_by: String,
    /// Opaque change description.
    pub diff: serde_json::Value,
}

/// Storage of groups, group memberships and bans.
#[async_trait]
pub trait GroupStore: Send + Sync {
    // ==================== Groups ====================

    /// Get a group by id, including soft-deleted ones.
    async fn get_group_by_id(&self, id: &str) -> AppResult<room_group::Model>;

    /// Ids of live groups matching `criteria`, in id order.
    async fn find_groups(&self, criteria: &FindCriteria) -> AppResult<Vec<String>>;

    /// Insert a group. Fails with `group.data.duplicate` if a live group has the same name.
    async fn add_group(&self, group: room_group::Model) -> AppResult<()>;

    /// Replace a live group's fields.
    async fn update_group(&self, group: room_group::Model) -> AppResult<()>;

    /// Remove all memberships of a live group, then soft-delete it.
    async fn soft_delete_group(&self, id: &str) -> AppResult<()>;

    /// Restore a soft-deleted group without its former memberships.
    async fn undelete_group(&self, id: &str) -> AppResult<()>;

    // ==================== Memberships ====================

    /// A fresh invitation row for `badge` in `group_id`.
    fn new_empty_group_membership(
        &self,
        group_id: &str,
        badge: i64,
        nickname: &str,
    ) -> group_member::Model {
        let now = Utc::now();
        group_member::Model {
            attendee_id: badge,
            group_id: group_id.to_string(),
            nickname: nickname.to_string(),
            avatar: None,
            flags: String::new(),
            is_invite: true,
            invite_type: InviteType::Invite,
            invite_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The membership row of `badge` in any group.
    async fn get_group_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<group_member::Model>>;

    /// All membership rows of a group, confirmed and pending, in badge order.
    async fn list_group_memberships_by_group(
        &self,
        group_id: &str,
    ) -> AppResult<Vec<group_member::Model>>;

    /// Insert a membership row.
    ///
    /// Fails with `group.member.duplicate` if the attendee already has a row in
    /// this group, `group.member.conflict` if in another, and
    /// `group.member.banned` if a live ban exists.
    async fn add_group_membership(&self, membership: group_member::Model) -> AppResult<()>;

    /// Replace an existing membership row of the same group.
    async fn update_group_membership(&self, membership: group_member::Model) -> AppResult<()>;

    /// Delete the membership row of `badge`.
    async fn delete_group_membership(&self, badge: i64) -> AppResult<()>;

    // ==================== Bans ====================

    /// Whether a live ban exists for `badge` in `group_id`.
    async fn has_group_ban(&self, group_id: &str, badge: i64) -> AppResult<bool>;

    /// Insert a ban unless a live one already exists.
    async fn add_group_ban(&self, ban: group_ban::Model) -> AppResult<()>;

    /// Lift the live ban for `badge` in `group_id`, if any.
    async fn remove_group_ban(&self, group_id: &str, badge: i64) -> AppResult<()>;

    /// Live bans of a group, in badge order.
    async fn list_group_bans(&self, group_id: &str) -> AppResult<Vec<group_ban::Model>>;
}

/// Storage of rooms and room occupancy.
#[async_trait]
pub trait RoomStore: Send + Sync {
    // ==================== Rooms ====================

    /// Get a room by id, including soft-deleted ones.
    async fn get_room_by_id(&self, id: &str) -> AppResult<room::Model>;

    /// Ids of live rooms matching `criteria`, in id order.
    async fn find_rooms(&self, criteria: &FindCriteria) -> AppResult<Vec<String>>;

    /// Insert a room. Fails with `room.data.duplicate` if a live room has the same name.
    async fn add_room(&self, room: room::Model) -> AppResult<()>;

    /// Replace a live room's fields. Fails with `room.size.too.small` if the
    /// new size is below the occupant count.
    async fn update_room(&self, room: room::Model) -> AppResult<()>;

    /// Soft-delete an empty live room.
    async fn soft_delete_room(&self, id: &str) -> AppResult<()>;

    /// Restore a soft-deleted room.
    async fn undelete_room(&self, id: &str) -> AppResult<()>;

    // ==================== Occupants ====================

    /// A fresh occupant row for `badge` in `room_id`.
    fn new_empty_room_membership(
        &self,
        room_id: &str,
        badge: i64,
        nickname: &str,
    ) -> room_member::Model {
        let now = Utc::now();
        room_member::Model {
            attendee_id: badge,
            room_id: room_id.to_string(),
            nickname: nickname.to_string(),
            avatar: None,
            flags: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The occupant row of `badge` in any room.
    async fn get_room_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<room_member::Model>>;

    /// All occupants of a room, in badge order.
    async fn list_room_memberships_by_room(
        &self,
        room_id: &str,
    ) -> AppResult<Vec<room_member::Model>>;

    /// Insert an occupant row.
    ///
    /// Fails with `room.occupant.duplicate` if the attendee is already in this
    /// room, `room.occupant.conflict` if in another, and `room.size.full` if
    /// the room has no free bed.
    async fn add_room_membership(&self, membership: room_member::Model) -> AppResult<()>;

    /// Replace an existing occupant row of the same room.
    async fn update_room_membership(&self, membership: room_member::Model) -> AppResult<()>;

    /// Delete the occupant row of `badge`.
    async fn delete_room_membership(&self, badge: i64) -> AppResult<()>;
}

/// Append-only audit log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a history record.
    async fn record_history(&self, entry: HistoryEntry) -> AppResult<()>;
}

/// The complete storage interface.
pub trait Repository: GroupStore + RoomStore + HistoryStore {}

impl<T: GroupStore + RoomStore + HistoryStore> Repository for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_default_matches_everything() {
        let criteria = FindCriteria::default();
        assert!(criteria.matches("kittens", &[]));
        assert!(criteria.matches("kittens", &[1, 2, 3]));
    }

    #[test]
    fn test_criteria_occupancy_bounds() {
        let criteria = FindCriteria {
            min_occupancy: 1,
            max_occupancy: 2,
            ..FindCriteria::default()
        };
        assert!(!criteria.matches("a", &[]));
        assert!(criteria.matches("a", &[1]));
        assert!(criteria.matches("a", &[1, 2]));
        assert!(!criteria.matches("a", &[1, 2, 3]));
    }

    #[test]
    fn test_criteria_any_of_badges_and_name() {
        let criteria = FindCriteria {
            any_of_badges: vec![42, 84],
            name: Some("kittens".to_string()),
            ..FindCriteria::default()
        };
        assert!(criteria.matches("kittens", &[1, 84]));
        assert!(!criteria.matches("kittens", &[1, 2]));
        assert!(!criteria.matches("puppies", &[42]));
    }
}
