//! Group ban entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ban of an attendee from a group. Lifted bans are soft-deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room_group_bans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The group.
    #[sea_orm(indexed)]
    pub group_id: String,

    /// Banned badge number.
    #[sea_orm(indexed)]
    pub attendee_id: i64,

    /// Comma-separated flags.
    pub flags: String,

    /// Free text.
    #[sea_orm(column_type = "Text")]
    pub comments: String,

    /// When the ban was created.
    pub created_at: DateTimeUtc,

    /// When the ban was last updated.
    pub updated_at: DateTimeUtc,

    /// When the ban was lifted.
    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::room_group::Entity",
        from = "Column::GroupId",
        to = "super::room_group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
}

impl Related<super::room_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
