//! Room occupancy entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Room occupant. The badge number is the primary key, so an attendee
/// occupies at most one room.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub attendee_id: i64,

    /// The room.
    #[sea_orm(indexed)]
    pub room_id: String,

    /// Nickname cached from the attendee registry.
    pub nickname: String,

    /// Avatar URL cached from the attendee registry.
    #[sea_orm(nullable)]
    pub avatar: Option<String>,

    /// Comma-separated flags.
    pub flags: String,

    /// When the occupant was added.
    pub created_at: DateTimeUtc,

    /// When the row was last updated.
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::room::Entity",
        from = "Column::RoomId",
        to = "super::room::Column::Id",
        on_delete = "Cascade"
    )]
    Room,
}

impl Related<super::room::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Room.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
