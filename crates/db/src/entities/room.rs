//! Room entity: a lodging unit with a fixed bed count.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Room.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rooms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Room name, unique among live rooms.
    #[sea_orm(indexed)]
    pub name: String,

    /// Comma-separated flags.
    pub flags: String,

    /// Free text.
    #[sea_orm(column_type = "Text")]
    pub comments: String,

    /// Number of beds.
    pub size: i32,

    /// When the room was created.
    pub created_at: DateTimeUtc,

    /// When the room was last updated.
    pub updated_at: DateTimeUtc,

    /// When the room was soft-deleted.
    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeUtc>,
}

impl Model {
    /// Whether the room is soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Flags as a list.
    #[must_use]
    pub fn flag_list(&self) -> Vec<String> {
        super::split_flags(&self.flags)
    }

    /// Whether the room carries `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.split(',').any(|f| f == flag)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::room_member::Entity")]
    Occupants,
}

impl Related<super::room_member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Occupants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
