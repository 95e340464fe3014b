//! In-memory repository for tests and local development.
//!
//! All state sits behind one `RwLock`; every write holds the write lock for
//! its whole check-and-modify sequence, which makes it atomic.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use roomsvc_common::{AppError, AppResult};
use tokio::sync::RwLock;

use super::{FindCriteria, GroupStore, HistoryEntry, HistoryStore, RoomStore};
use crate::entities::{group_ban, group_member, history, room, room_group, room_member};

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, room_group::Model>,
    group_members: BTreeMap<i64, group_member::Model>,
    group_bans: Vec<group_ban::Model>,
    rooms: BTreeMap<String, room::Model>,
    room_members: BTreeMap<i64, room_member::Model>,
    history: Vec<history::Model>,
}

impl State {
    fn live_group(&self, id: &str) -> AppResult<&room_group::Model> {
        self.groups
            .get(id)
            .filter(|g| !g.is_deleted())
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
    }

    fn live_room(&self, id: &str) -> AppResult<&room::Model> {
        self.rooms
            .get(id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))
    }

    fn group_name_taken(&self, name: &str, except: &str) -> bool {
        self.groups
            .values()
            .any(|g| !g.is_deleted() && g.name == name && g.id != except)
    }

    fn room_name_taken(&self, name: &str, except: &str) -> bool {
        self.rooms
            .values()
            .any(|r| !r.is_deleted() && r.name == name && r.id != except)
    }

    fn has_live_ban(&self, group_id: &str, badge: i64) -> bool {
        self.group_bans
            .iter()
            .any(|b| b.group_id == group_id && b.attendee_id == badge && b.deleted_at.is_none())
    }

    fn confirmed_members(&self, group_id: &str) -> Vec<i64> {
        self.group_members
            .values()
            .filter(|m| m.group_id == group_id && !m.is_invite)
            .map(|m| m.attendee_id)
            .collect()
    }

    fn occupants(&self, room_id: &str) -> Vec<i64> {
        self.room_members
            .values()
            .filter(|m| m.room_id == room_id)
            .map(|m| m.attendee_id)
            .collect()
    }
}

/// Repository keeping everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All history records, oldest first.
    pub async fn history(&self) -> Vec<history::Model> {
        self.state.read().await.history.clone()
    }
}

#[async_trait]
impl GroupStore for InMemoryRepository {
    async fn get_group_by_id(&self, id: &str) -> AppResult<room_group::Model> {
        self.state
            .read()
            .await
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
    }

    async fn find_groups(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| !g.is_deleted())
            .filter(|g| criteria.matches(&g.name, &state.confirmed_members(&g.id)))
            .map(|g| g.id.clone())
            .collect())
    }

    async fn add_group(&self, mut group: room_group::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        if state.groups.contains_key(&group.id) {
            return Err(AppError::GroupWrite(format!("group id {} already in use", group.id)));
        }
        if state.group_name_taken(&group.name, &group.id) {
            return Err(AppError::GroupDataDuplicate(format!(
                "another group with name {} already exists",
                group.name
            )));
        }

        let now = Utc::now();
        group.created_at = now;
        group.updated_at = now;
        group.deleted_at = None;
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn update_group(&self, mut group: room_group::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        let created_at = state.live_group(&group.id)?.created_at;
        if state.group_name_taken(&group.name, &group.id) {
            return Err(AppError::GroupDataDuplicate(format!(
                "another group with name {} already exists",
                group.name
            )));
        }

        group.created_at = created_at;
        group.updated_at = Utc::now();
        group.deleted_at = None;
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn soft_delete_group(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.live_group(id)?;

        state.group_members.retain(|_, m| m.group_id != id);
        if let Some(group) = state.groups.get_mut(id) {
            let now = Utc::now();
            group.deleted_at = Some(now);
            group.updated_at = now;
        }
        Ok(())
    }

    async fn undelete_group(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;

        let name = state
            .groups
            .get(id)
            .filter(|g| g.is_deleted())
            .map(|g| g.name.clone())
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))?;
        if state.group_name_taken(&name, id) {
            return Err(AppError::GroupDataDuplicate(format!(
                "another group with name {name} already exists"
            )));
        }

        if let Some(group) = state.groups.get_mut(id) {
            group.deleted_at = None;
            group.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_group_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<group_member::Model>> {
        Ok(self.state.read().await.group_members.get(&badge).cloned())
    }

    async fn list_group_memberships_by_group(
        &self,
        group_id: &str,
    ) -> AppResult<Vec<group_member::Model>> {
        Ok(self
            .state
            .read()
            .await
            .group_members
            .values()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn add_group_membership(&self, mut membership: group_member::Model) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.live_group(&membership.group_id)?;

        if let Some(existing) = state.group_members.get(&membership.attendee_id) {
            return Err(if existing.group_id == membership.group_id {
                AppError::GroupMemberDuplicate(membership.attendee_id.to_string())
            } else {
                AppError::GroupMemberConflict(membership.attendee_id.to_string())
            });
        }
        if state.has_live_ban(&membership.group_id, membership.attendee_id) {
            return Err(AppError::GroupMemberBanned(membership.attendee_id.to_string()));
        }

        let now = Utc::now();
        membership.created_at = now;
        membership.updated_at = now;
        state.group_members.insert(membership.attendee_id, membership);
        Ok(())
    }

    async fn update_group_membership(&self, mut membership: group_member::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        let existing = state
            .group_members
            .get_mut(&membership.attendee_id)
            .filter(|m| m.group_id == membership.group_id)
            .ok_or_else(|| AppError::GroupMemberNotFound(membership.attendee_id.to_string()))?;

        membership.created_at = existing.created_at;
        membership.updated_at = Utc::now();
        *existing = membership;
        Ok(())
    }

    async fn delete_group_membership(&self, badge: i64) -> AppResult<()> {
        self.state
            .write()
            .await
            .group_members
            .remove(&badge)
            .map(|_| ())
            .ok_or_else(|| AppError::GroupMemberNotFound(badge.to_string()))
    }

    async fn has_group_ban(&self, group_id: &str, badge: i64) -> AppResult<bool> {
        Ok(self.state.read().await.has_live_ban(group_id, badge))
    }

    async fn add_group_ban(&self, mut ban: group_ban::Model) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.has_live_ban(&ban.group_id, ban.attendee_id) {
            return Ok(());
        }

        let now = Utc::now();
        ban.created_at = now;
        ban.updated_at = now;
        ban.deleted_at = None;
        state.group_bans.push(ban);
        Ok(())
    }

    async fn remove_group_ban(&self, group_id: &str, badge: i64) -> AppResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for ban in state
            .group_bans
            .iter_mut()
            .filter(|b| b.group_id == group_id && b.attendee_id == badge && b.deleted_at.is_none())
        {
            ban.deleted_at = Some(now);
            ban.updated_at = now;
        }
        Ok(())
    }

    async fn list_group_bans(&self, group_id: &str) -> AppResult<Vec<group_ban::Model>> {
        let mut bans: Vec<_> = self
            .state
            .read()
            .await
            .group_bans
            .iter()
            .filter(|b| b.group_id == group_id && b.deleted_at.is_none())
            .cloned()
            .collect();
        bans.sort_by_key(|b| b.attendee_id);
        Ok(bans)
    }
}

#[async_trait]
impl RoomStore for InMemoryRepository {
    async fn get_room_by_id(&self, id: &str) -> AppResult<room::Model> {
        self.state
            .read()
            .await
            .rooms
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))
    }

    async fn find_rooms(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .rooms
            .values()
            .filter(|r| !r.is_deleted())
            .filter(|r| criteria.matches(&r.name, &state.occupants(&r.id)))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn add_room(&self, mut room: room::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        if state.rooms.contains_key(&room.id) {
            return Err(AppError::RoomWrite(format!("room id {} already in use", room.id)));
        }
        if state.room_name_taken(&room.name, &room.id) {
            return Err(AppError::RoomDataDuplicate(format!(
                "another room with name {} already exists",
                room.name
            )));
        }

        let now = Utc::now();
        room.created_at = now;
        room.updated_at = now;
        room.deleted_at = None;
        state.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn update_room(&self, mut room: room::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        let created_at = state.live_room(&room.id)?.created_at;
        if state.room_name_taken(&room.name, &room.id) {
            return Err(AppError::RoomDataDuplicate(format!(
                "another room with name {} already exists",
                room.name
            )));
        }
        let occupants = state.occupants(&room.id).len();
        if (room.size.max(0) as usize) < occupants {
            return Err(AppError::RoomSizeTooSmall(format!(
                "room has {occupants} occupants"
            )));
        }

        room.created_at = created_at;
        room.updated_at = Utc::now();
        room.deleted_at = None;
        state.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn soft_delete_room(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.live_room(id)?;

        if !state.occupants(id).is_empty() {
            return Err(AppError::RoomNotEmpty(id.to_string()));
        }
        if let Some(room) = state.rooms.get_mut(id) {
            let now = Utc::now();
            room.deleted_at = Some(now);
            room.updated_at = now;
        }
        Ok(())
    }

    async fn undelete_room(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;

        let name = state
            .rooms
            .get(id)
            .filter(|r| r.is_deleted())
            .map(|r| r.name.clone())
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))?;
        if state.room_name_taken(&name, id) {
            return Err(AppError::RoomDataDuplicate(format!(
                "another room with name {name} already exists"
            )));
        }

        if let Some(room) = state.rooms.get_mut(id) {
            room.deleted_at = None;
            room.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_room_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<room_member::Model>> {
        Ok(self.state.read().await.room_members.get(&badge).cloned())
    }

    async fn list_room_memberships_by_room(
        &self,
        room_id: &str,
    ) -> AppResult<Vec<room_member::Model>> {
        Ok(self
            .state
            .read()
            .await
            .room_members
            .values()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn add_room_membership(&self, mut membership: room_member::Model) -> AppResult<()> {
        let mut state = self.state.write().await;
        let size = state.live_room(&membership.room_id)?.size;

        if let Some(existing) = state.room_members.get(&membership.attendee_id) {
            return Err(if existing.room_id == membership.room_id {
                AppError::RoomOccupantDuplicate(membership.attendee_id.to_string())
            } else {
                AppError::RoomOccupantConflict(membership.attendee_id.to_string())
            });
        }
        if state.occupants(&membership.room_id).len() >= size.max(0) as usize {
            return Err(AppError::RoomSizeFull(membership.room_id.clone()));
        }

        let now = Utc::now();
        membership.created_at = now;
        membership.updated_at = now;
        state.room_members.insert(membership.attendee_id, membership);
        Ok(())
    }

    async fn update_room_membership(&self, mut membership: room_member::Model) -> AppResult<()> {
        let mut state = self.state.write().await;

        let existing = state
            .room_members
            .get_mut(&membership.attendee_id)
            .filter(|m| m.room_id == membership.room_id)
            .ok_or_else(|| AppError::RoomOccupantNotFound(membership.attendee_id.to_string()))?;

        membership.created_at = existing.created_at;
        membership.updated_at = Utc::now();
        *existing = membership;
        Ok(())
    }

    async fn delete_room_membership(&self, badge: i64) -> AppResult<()> {
        self.state
            .write()
            .await
            .room_members
            .remove(&badge)
            .map(|_| ())
            .ok_or_else(|| AppError::RoomOccupantNotFound(badge.to_string()))
    }
}

#[async_trait]
impl HistoryStore for InMemoryRepository {
    async fn record_history(&self, entry: HistoryEntry) -> AppResult<()> {
        let mut state = self.state.write().await;
        let id = state.history.len() as i64 + 1;
        state.history.push(history::Model {
            id,
            entity: entry.entity,
            entity_id: entry.entity_id,
            operation: entry.operation,
            requested_by: entry.requested_by,
            diff: entry.diff,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
