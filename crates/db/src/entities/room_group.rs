//! Room group entity: a travel party that wants to share lodging.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Room group.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room_groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Group name, unique among live groups.
    #[sea_orm(indexed)]
    pub name: String,

    /// Comma-separated flags.
    pub flags: String,

    /// Free text.
    #[sea_orm(column_type = "Text")]
    pub comments: String,

    /// Maximum number of confirmed members.
    pub maximum_size: i32,

    /// Badge number of the owner.
    pub owner: i64,

    /// When the group was created.
    pub created_at: DateTimeUtc,

    /// When the group was last updated.
    pub updated_at: DateTimeUtc,

    /// When the group was soft-deleted.
    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeUtc>,
}

impl Model {
    /// Whether the group is soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Flags as a list.
    #[must_use]
    pub fn flag_list(&self) -> Vec<String> {
        super::split_flags(&self.flags)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::group_member::Entity")]
    Members,
    #[sea_orm(has_many = "super::group_ban::Entity")]
    Bans,
}

impl Related<super::group_member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Members.def()
    }
}

impl Related<super::group_ban::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
