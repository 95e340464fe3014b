//! SQL repository on top of sea-orm.
//!
//! Writes run in a transaction that re-reads the rows it depends on before
//! modifying anything; unique keys on the attendee id back the
//! one-membership-per-attendee rule.

use std::sync::Arc;

use roomsvc_common::AppError;
use sea_orm::{DatabaseConnection, DbErr, Set, SqlErr};

use crate::entities::{group_ban, group_member, room, room_group, room_member};

mod groups;
mod history;
mod rooms;

/// Repository backed by a relational database.
#[derive(Clone)]
pub struct SqlRepository {
    db: Arc<DatabaseConnection>,
}

impl SqlRepository {
    /// Create a new SQL repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Get reference to the database connection.
    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

fn group_read(e: DbErr) -> AppError {
    AppError::GroupRead(e.to_string())
}

fn group_write(e: DbErr) -> AppError {
    AppError::GroupWrite(e.to_string())
}

fn room_read(e: DbErr) -> AppError {
    AppError::RoomRead(e.to_string())
}

fn room_write(e: DbErr) -> AppError {
    AppError::RoomWrite(e.to_string())
}

fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn group_active(group: room_group::Model) -> room_group::ActiveModel {
    room_group::ActiveModel {
        id: Set(group.id),
        name: Set(group.name),
        flags: Set(group.flags),
        comments: Set(group.comments),
        maximum_size: Set(group.maximum_size),
        owner: Set(group.owner),
        created_at: Set(group.created_at),
        updated_at: Set(group.updated_at),
        deleted_at: Set(group.deleted_at),
    }
}

fn group_member_active(member: group_member::Model) -> group_member::ActiveModel {
    group_member::ActiveModel {
        attendee_id: Set(member.attendee_id),
        group_id: Set(member.group_id),
        nickname: Set(member.nickname),
        avatar: Set(member.avatar),
        flags: Set(member.flags),
        is_invite: Set(member.is_invite),
        invite_type: Set(member.invite_type),
        invite_code: Set(member.invite_code),
        created_at: Set(member.created_at),
        updated_at: Set(member.updated_at),
    }
}

fn group_ban_active(ban: group_ban::Model) -> group_ban::ActiveModel {
    group_ban::ActiveModel {
        id: Set(ban.id),
        group_id: Set(ban.group_id),
        attendee_id: Set(ban.attendee_id),
        flags: Set(ban.flags),
        comments: Set(ban.comments),
        created_at: Set(ban.created_at),
        updated_at: Set(ban.updated_at),
        deleted_at: Set(ban.deleted_at),
    }
}

fn room_active(room: room::Model) -> room::ActiveModel {
    room::ActiveModel {
        id: Set(room.id),
        name: Set(room.name),
        flags: Set(room.flags),
        comments: Set(room.comments),
        size: Set(room.size),
        created_at: Set(room.created_at),
        updated_at: Set(room.updated_at),
        deleted_at: Set(room.deleted_at),
    }
}

fn room_member_active(member: room_member::Model) -> room_member::ActiveModel {
    room_member::ActiveModel {
        attendee_id: Set(member.attendee_id),
        room_id: Set(member.room_id),
        nickname: Set(member.nickname),
        avatar: Set(member.avatar),
        flags: Set(member.flags),
        created_at: Set(member.created_at),
        updated_at: Set(member.updated_at),
    }
}
