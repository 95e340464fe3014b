//! Rooms and room occupancy.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomsvc_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};

use super::{
    SqlRepository, is_unique_violation, room_active, room_member_active, room_read, room_write,
};
use crate::entities::{Room, RoomMember, room, room_member};
use crate::repositories::{FindCriteria, RoomStore};

async fn live_room<C: ConnectionTrait>(conn: &C, id: &str) -> AppResult<room::Model> {
    Room::find_by_id(id)
        .one(conn)
        .await
        .map_err(room_read)?
        .filter(|r| !r.is_deleted())
        .ok_or_else(|| AppError::RoomNotFound(id.to_string()))
}

async fn name_taken<C: ConnectionTrait>(conn: &C, name: &str, except: &str) -> AppResult<bool> {
    let existing = Room::find()
        .filter(room::Column::Name.eq(name))
        .filter(room::Column::DeletedAt.is_null())
        .filter(room::Column::Id.ne(except))
        .one(conn)
        .await
        .map_err(room_read)?;

    Ok(existing.is_some())
}

async fn occupant_count<C: ConnectionTrait>(conn: &C, room_id: &str) -> AppResult<u64> {
    RoomMember::find()
        .filter(room_member::Column::RoomId.eq(room_id))
        .count(conn)
        .await
        .map_err(room_read)
}

fn duplicate_name(name: &str) -> AppError {
    AppError::RoomDataDuplicate(format!("another room with name {name} already exists"))
}

/// Write error mapping for statements that set a live name. The unique index
/// on the live name catches a concurrent writer the read check missed.
fn name_write(name: &str) -> impl FnOnce(DbErr) -> AppError + '_ {
    move |e| {
        if is_unique_violation(&e) {
            duplicate_name(name)
        } else {
            room_write(e)
        }
    }
}

#[async_trait]
impl RoomStore for SqlRepository {
    // ==================== Rooms ====================

    async fn get_room_by_id(&self, id: &str) -> AppResult<room::Model> {
        Room::find_by_id(id)
            .one(self.db())
            .await
            .map_err(room_read)?
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))
    }

    async fn find_rooms(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        let mut query = Room::find().filter(room::Column::DeletedAt.is_null());
        if let Some(name) = &criteria.name {
            query = query.filter(room::Column::Name.eq(name.as_str()));
        }
        let rooms = query
            .order_by_asc(room::Column::Id)
            .all(self.db())
            .await
            .map_err(room_read)?;

        if rooms.is_empty() {
            return Ok(vec![]);
        }

        let room_ids: Vec<String> = rooms.iter().map(|r| r.id.clone()).collect();
        let occupants = RoomMember::find()
            .filter(room_member::Column::RoomId.is_in(room_ids))
            .all(self.db())
            .await
            .map_err(room_read)?;

        let mut by_room: HashMap<&str, Vec<i64>> = HashMap::new();
        for occupant in &occupants {
            by_room
                .entry(occupant.room_id.as_str())
                .or_default()
                .push(occupant.attendee_id);
        }

        Ok(rooms
            .into_iter()
            .filter(|r| {
                let badges = by_room.get(r.id.as_str()).map_or(&[][..], Vec::as_slice);
                criteria.matches(&r.name, badges)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn add_room(&self, mut room: room::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;

        if name_taken(&txn, &room.name, &room.id).await? {
            return Err(duplicate_name(&room.name));
        }

        let now = Utc::now();
        room.created_at = now;
        room.updated_at = now;
        room.deleted_at = None;

        let name = room.name.clone();
        Room::insert(room_active(room))
            .exec_without_returning(&txn)
            .await
            .map_err(name_write(&name))?;

        txn.commit().await.map_err(room_write)
    }

    async fn update_room(&self, mut room: room::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;

        let current = live_room(&txn, &room.id).await?;
        if name_taken(&txn, &room.name, &room.id).await? {
            return Err(duplicate_name(&room.name));
        }
        let occupants = occupant_count(&txn, &room.id).await?;
        if (room.size.max(0) as u64) < occupants {
            return Err(AppError::RoomSizeTooSmall(format!(
                "room has {occupants} occupants"
            )));
        }

        room.created_at = current.created_at;
        room.updated_at = Utc::now();
        room.deleted_at = None;

        let id = room.id.clone();
        let name = room.name.clone();
        Room::update_many()
            .set(room_active(room))
            .filter(room::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(name_write(&name))?;

        txn.commit().await.map_err(room_write)
    }

    async fn soft_delete_room(&self, id: &str) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;
        live_room(&txn, id).await?;

        if occupant_count(&txn, id).await? > 0 {
            return Err(AppError::RoomNotEmpty(id.to_string()));
        }

        let now = Utc::now();
        Room::update_many()
            .col_expr(room::Column::DeletedAt, Expr::value(now))
            .col_expr(room::Column::UpdatedAt, Expr::value(now))
            .filter(room::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(room_write)?;

        txn.commit().await.map_err(room_write)
    }

    async fn undelete_room(&self, id: &str) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;

        let room = Room::find_by_id(id)
            .one(&txn)
            .await
            .map_err(room_read)?
            .filter(room::Model::is_deleted)
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))?;
        if name_taken(&txn, &room.name, id).await? {
            return Err(duplicate_name(&room.name));
        }

        Room::update_many()
            .col_expr(
                room::Column::DeletedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(room::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(room::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(name_write(&room.name))?;

        txn.commit().await.map_err(room_write)
    }

    // ==================== Occupants ====================

    async fn get_room_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<room_member::Model>> {
        RoomMember::find_by_id(badge)
            .one(self.db())
            .await
            .map_err(room_read)
    }

    async fn list_room_memberships_by_room(
        &self,
        room_id: &str,
    ) -> AppResult<Vec<room_member::Model>> {
        RoomMember::find()
            .filter(room_member::Column::RoomId.eq(room_id))
            .order_by_asc(room_member::Column::AttendeeId)
            .all(self.db())
            .await
            .map_err(room_read)
    }

    async fn add_room_membership(&self, mut membership: room_member::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;
        let room = live_room(&txn, &membership.room_id).await?;

        let badge = membership.attendee_id;
        if let Some(existing) = RoomMember::find_by_id(badge)
            .one(&txn)
            .await
            .map_err(room_read)?
        {
            return Err(if existing.room_id == membership.room_id {
                AppError::RoomOccupantDuplicate(badge.to_string())
            } else {
                AppError::RoomOccupantConflict(badge.to_string())
            });
        }
        if occupant_count(&txn, &room.id).await? >= room.size.max(0) as u64 {
            return Err(AppError::RoomSizeFull(room.id));
        }

        let now = Utc::now();
        membership.created_at = now;
        membership.updated_at = now;

        RoomMember::insert(room_member_active(membership))
            .exec_without_returning(&txn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::RoomOccupantConflict(badge.to_string())
                } else {
                    room_write(e)
                }
            })?;

        txn.commit().await.map_err(room_write)
    }

    async fn update_room_membership(&self, mut membership: room_member::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(room_write)?;

        let badge = membership.attendee_id;
        let existing = RoomMember::find_by_id(badge)
            .one(&txn)
            .await
            .map_err(room_read)?
            .filter(|m| m.room_id == membership.room_id)
            .ok_or_else(|| AppError::RoomOccupantNotFound(badge.to_string()))?;

        membership.created_at = existing.created_at;
        membership.updated_at = Utc::now();

        RoomMember::update_many()
            .set(room_member_active(membership))
            .filter(room_member::Column::AttendeeId.eq(badge))
            .exec(&txn)
            .await
            .map_err(room_write)?;

        txn.commit().await.map_err(room_write)
    }

    async fn delete_room_membership(&self, badge: i64) -> AppResult<()> {
        let result = RoomMember::delete_by_id(badge)
            .exec(self.db())
            .await
            .map_err(room_write)?;

        if result.rows_affected == 0 {
            return Err(AppError::RoomOccupantNotFound(badge.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;

    fn create_test_room(id: &str, name: &str, size: i32) -> room::Model {
        let now = Utc::now();
        room::Model {
            id: id.to_string(),
            name: name.to_string(),
            flags: "final".to_string(),
            comments: String::new(),
            size,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn create_test_occupant(room_id: &str, badge: i64) -> room_member::Model {
        let now = Utc::now();
        room_member::Model {
            attendee_id: badge,
            room_id: room_id.to_string(),
            nickname: format!("nick{badge}"),
            avatar: None,
            flags: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_get_room_by_id() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[create_test_room("r1", "31415", 2)]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let room = repo.get_room_by_id("r1").await.unwrap();

        assert_eq!(room.name, "31415");
        assert!(room.has_flag("final"));
    }

    #[tokio::test]
    async fn test_find_rooms_by_member() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[
                    create_test_room("r1", "31415", 2),
                    create_test_room("r2", "27182", 2),
                ]])
                .append_query_results([[
                    create_test_occupant("r1", 42),
                    create_test_occupant("r2", 84),
                ]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let criteria = FindCriteria {
            any_of_badges: vec![84],
            ..FindCriteria::default()
        };
        let result = repo.find_rooms(&criteria).await.unwrap();

        assert_eq!(result, vec!["r2".to_string()]);
    }

    #[tokio::test]
    async fn test_get_room_membership_by_badge() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[create_test_occupant("r1", 42)]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let occupant = repo.get_room_membership_by_badge(42).await.unwrap();

        assert_eq!(occupant.unwrap().room_id, "r1");
    }
}
