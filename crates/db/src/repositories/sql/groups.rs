//! Groups, group memberships and bans.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomsvc_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};

use super::{
    SqlRepository, group_active, group_ban_active, group_member_active, group_read, group_write,
    is_unique_violation,
};
use crate::entities::{GroupBan, GroupMember, RoomGroup, group_ban, group_member, room_group};
use crate::repositories::{FindCriteria, GroupStore};

async fn live_group<C: ConnectionTrait>(conn: &C, id: &str) -> AppResult<room_group::Model> {
    RoomGroup::find_by_id(id)
        .one(conn)
        .await
        .map_err(group_read)?
        .filter(|g| !g.is_deleted())
        .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
}

async fn name_taken<C: ConnectionTrait>(conn: &C, name: &str, except: &str) -> AppResult<bool> {
    let existing = RoomGroup::find()
        .filter(room_group::Column::Name.eq(name))
        .filter(room_group::Column::DeletedAt.is_null())
        .filter(room_group::Column::Id.ne(except))
        .one(conn)
        .await
        .map_err(group_read)?;

    Ok(existing.is_some())
}

async fn live_ban<C: ConnectionTrait>(
    conn: &C,
    group_id: &str,
    badge: i64,
) -> AppResult<Option<group_ban::Model>> {
    GroupBan::find()
        .filter(group_ban::Column::GroupId.eq(group_id))
        .filter(group_ban::Column::AttendeeId.eq(badge))
        .filter(group_ban::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(group_read)
}

fn duplicate_name(name: &str) -> AppError {
    AppError::GroupDataDuplicate(format!("another group with name {name} already exists"))
}

/// Write error mapping for statements that set a live name. The unique index
/// on the live name catches a concurrent writer the read check missed.
fn name_write(name: &str) -> impl FnOnce(DbErr) -> AppError + '_ {
    move |e| {
        if is_unique_violation(&e) {
            duplicate_name(name)
        } else {
            group_write(e)
        }
    }
}

#[async_trait]
impl GroupStore for SqlRepository {
    // ==================== Groups ====================

    async fn get_group_by_id(&self, id: &str) -> AppResult<room_group::Model> {
        RoomGroup::find_by_id(id)
            .one(self.db())
            .await
            .map_err(group_read)?
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
    }

    async fn find_groups(&self, criteria: &FindCriteria) -> AppResult<Vec<String>> {
        let mut query = RoomGroup::find().filter(room_group::Column::DeletedAt.is_null());
        if let Some(name) = &criteria.name {
            query = query.filter(room_group::Column::Name.eq(name.as_str()));
        }
        let groups = query
            .order_by_asc(room_group::Column::Id)
            .all(self.db())
            .await
            .map_err(group_read)?;

        if groups.is_empty() {
            return Ok(vec![]);
        }

        let group_ids: Vec<String> = groups.iter().map(|g| g.id.clone()).collect();
        let members = GroupMember::find()
            .filter(group_member::Column::GroupId.is_in(group_ids))
            .filter(group_member::Column::IsInvite.eq(false))
            .all(self.db())
            .await
            .map_err(group_read)?;

        let mut by_group: HashMap<&str, Vec<i64>> = HashMap::new();
        for member in &members {
            by_group
                .entry(member.group_id.as_str())
                .or_default()
                .push(member.attendee_id);
        }

        Ok(groups
            .into_iter()
            .filter(|g| {
                let badges = by_group.get(g.id.as_str()).map_or(&[][..], Vec::as_slice);
                criteria.matches(&g.name, badges)
            })
            .map(|g| g.id)
            .collect())
    }

    async fn add_group(&self, mut group: room_group::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;

        if name_taken(&txn, &group.name, &group.id).await? {
            return Err(duplicate_name(&group.name));
        }

        let now = Utc::now();
        group.created_at = now;
        group.updated_at = now;
        group.deleted_at = None;

        let name = group.name.clone();
        RoomGroup::insert(group_active(group))
            .exec_without_returning(&txn)
            .await
            .map_err(name_write(&name))?;

        txn.commit().await.map_err(group_write)
    }

    async fn update_group(&self, mut group: room_group::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;

        let current = live_group(&txn, &group.id).await?;
        if name_taken(&txn, &group.name, &group.id).await? {
            return Err(duplicate_name(&group.name));
        }

        group.created_at = current.created_at;
        group.updated_at = Utc::now();
        group.deleted_at = None;

        let id = group.id.clone();
        let name = group.name.clone();
        RoomGroup::update_many()
            .set(group_active(group))
            .filter(room_group::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(name_write(&name))?;

        txn.commit().await.map_err(group_write)
    }

    async fn soft_delete_group(&self, id: &str) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;
        live_group(&txn, id).await?;

        GroupMember::delete_many()
            .filter(group_member::Column::GroupId.eq(id))
            .exec(&txn)
            .await
            .map_err(group_write)?;

        let now = Utc::now();
        RoomGroup::update_many()
            .col_expr(room_group::Column::DeletedAt, Expr::value(now))
            .col_expr(room_group::Column::UpdatedAt, Expr::value(now))
            .filter(room_group::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(group_write)?;

        txn.commit().await.map_err(group_write)
    }

    async fn undelete_group(&self, id: &str) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;

        let group = RoomGroup::find_by_id(id)
            .one(&txn)
            .await
            .map_err(group_read)?
            .filter(room_group::Model::is_deleted)
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))?;
        if name_taken(&txn, &group.name, id).await? {
            return Err(duplicate_name(&group.name));
        }

        RoomGroup::update_many()
            .col_expr(
                room_group::Column::DeletedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(room_group::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(room_group::Column::Id.eq(id))
            .exec(&txn)
            .await
            .map_err(name_write(&group.name))?;

        txn.commit().await.map_err(group_write)
    }

    // ==================== Memberships ====================

    async fn get_group_membership_by_badge(
        &self,
        badge: i64,
    ) -> AppResult<Option<group_member::Model>> {
        GroupMember::find_by_id(badge)
            .one(self.db())
            .await
            .map_err(group_read)
    }

    async fn list_group_memberships_by_group(
        &self,
        group_id: &str,
    ) -> AppResult<Vec<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .order_by_asc(group_member::Column::AttendeeId)
            .all(self.db())
            .await
            .map_err(group_read)
    }

    async fn add_group_membership(&self, mut membership: group_member::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;
        live_group(&txn, &membership.group_id).await?;

        let badge = membership.attendee_id;
        if let Some(existing) = GroupMember::find_by_id(badge)
            .one(&txn)
            .await
            .map_err(group_read)?
        {
            return Err(if existing.group_id == membership.group_id {
                AppError::GroupMemberDuplicate(badge.to_string())
            } else {
                AppError::GroupMemberConflict(badge.to_string())
            });
        }
        if live_ban(&txn, &membership.group_id, badge).await?.is_some() {
            return Err(AppError::GroupMemberBanned(badge.to_string()));
        }

        let now = Utc::now();
        membership.created_at = now;
        membership.updated_at = now;

        GroupMember::insert(group_member_active(membership))
            .exec_without_returning(&txn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::GroupMemberConflict(badge.to_string())
                } else {
                    group_write(e)
                }
            })?;

        txn.commit().await.map_err(group_write)
    }

    async fn update_group_membership(&self, mut membership: group_member::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;

        let badge = membership.attendee_id;
        let existing = GroupMember::find_by_id(badge)
            .one(&txn)
            .await
            .map_err(group_read)?
            .filter(|m| m.group_id == membership.group_id)
            .ok_or_else(|| AppError::GroupMemberNotFound(badge.to_string()))?;

        membership.created_at = existing.created_at;
        membership.updated_at = Utc::now();

        GroupMember::update_many()
            .set(group_member_active(membership))
            .filter(group_member::Column::AttendeeId.eq(badge))
            .exec(&txn)
            .await
            .map_err(group_write)?;

        txn.commit().await.map_err(group_write)
    }

    async fn delete_group_membership(&self, badge: i64) -> AppResult<()> {
        let result = GroupMember::delete_by_id(badge)
            .exec(self.db())
            .await
            .map_err(group_write)?;

        if result.rows_affected == 0 {
            return Err(AppError::GroupMemberNotFound(badge.to_string()));
        }
        Ok(())
    }

    // ==================== Bans ====================

    async fn has_group_ban(&self, group_id: &str, badge: i64) -> AppResult<bool> {
        Ok(live_ban(self.db(), group_id, badge).await?.is_some())
    }

    async fn add_group_ban(&self, mut ban: group_ban::Model) -> AppResult<()> {
        let txn = self.db().begin().await.map_err(group_write)?;

        if live_ban(&txn, &ban.group_id, ban.attendee_id).await?.is_some() {
            return Ok(());
        }

        let now = Utc::now();
        ban.created_at = now;
        ban.updated_at = now;
        ban.deleted_at = None;

        GroupBan::insert(group_ban_active(ban))
            .exec_without_returning(&txn)
            .await
            .map_err(group_write)?;

        txn.commit().await.map_err(group_write)
    }

    async fn remove_group_ban(&self, group_id: &str, badge: i64) -> AppResult<()> {
        let now = Utc::now();
        GroupBan::update_many()
            .col_expr(group_ban::Column::DeletedAt, Expr::value(now))
            .col_expr(group_ban::Column::UpdatedAt, Expr::value(now))
            .filter(group_ban::Column::GroupId.eq(group_id))
            .filter(group_ban::Column::AttendeeId.eq(badge))
            .filter(group_ban::Column::DeletedAt.is_null())
            .exec(self.db())
            .await
            .map_err(group_write)?;

        Ok(())
    }

    async fn list_group_bans(&self, group_id: &str) -> AppResult<Vec<group_ban::Model>> {
        GroupBan::find()
            .filter(group_ban::Column::GroupId.eq(group_id))
            .filter(group_ban::Column::DeletedAt.is_null())
            .order_by_asc(group_ban::Column::AttendeeId)
            .all(self.db())
            .await
            .map_err(group_read)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;
    use crate::entities::group_member::InviteType;

    fn create_test_group(id: &str, name: &str) -> room_group::Model {
        let now = Utc::now();
        room_group::Model {
            id: id.to_string(),
            name: name.to_string(),
            flags: "public".to_string(),
            comments: String::new(),
            maximum_size: 6,
            owner: 42,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn create_test_member(group_id: &str, badge: i64, is_invite: bool) -> group_member::Model {
        let now = Utc::now();
        group_member::Model {
            attendee_id: badge,
            group_id: group_id.to_string(),
            nickname: format!("nick{badge}"),
            avatar: None,
            flags: String::new(),
            is_invite,
            invite_type: InviteType::Invite,
            invite_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_get_group_by_id() {
        let group = create_test_group("g1", "kittens");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[group.clone()]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let result = repo.get_group_by_id("g1").await.unwrap();

        assert_eq!(result.name, "kittens");
    }

    #[tokio::test]
    async fn test_get_group_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([Vec::<room_group::Model>::new()])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let err = repo.get_group_by_id("g1").await.unwrap_err();

        assert_eq!(err.message(), "group.id.notfound");
    }

    #[tokio::test]
    async fn test_find_groups_filters_by_occupancy() {
        let g1 = create_test_group("g1", "kittens");
        let g2 = create_test_group("g2", "puppies");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[g1, g2]])
                .append_query_results([[
                    create_test_member("g1", 42, false),
                    create_test_member("g1", 43, false),
                    create_test_member("g2", 84, false),
                ]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let criteria = FindCriteria {
            min_occupancy: 2,
            ..FindCriteria::default()
        };
        let result = repo.find_groups(&criteria).await.unwrap();

        assert_eq!(result, vec!["g1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_group_memberships_by_group() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_results([[
                    create_test_member("g1", 42, false),
                    create_test_member("g1", 84, true),
                ]])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let result = repo.list_group_memberships_by_group("g1").await.unwrap();

        assert_eq!(result.len(), 2);
        assert!(result[1].is_invite);
    }

    #[tokio::test]
    async fn test_delete_missing_membership() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let err = repo.delete_group_membership(42).await.unwrap_err();

        assert_eq!(err.message(), "group.member.notfound");
    }

    #[tokio::test]
    async fn test_database_errors_map_to_group_read() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::MySql)
                .append_query_errors([sea_orm::DbErr::Custom("connection lost".to_string())])
                .into_connection(),
        );

        let repo = SqlRepository::new(db);
        let err = repo.get_group_membership_by_badge(42).await.unwrap_err();

        assert_eq!(err.message(), "group.read.error");
        assert!(err.public_details().is_empty());
    }
}
