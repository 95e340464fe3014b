//! Group membership entity.
//!
//! One row per attendee across all groups. A row with `is_invite` set is an
//! outstanding invitation or application; `invite_type` records which side
//! created it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Who created a membership row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum InviteType {
    /// The owner (or an operator) invited the attendee.
    #[sea_orm(string_value = "invite")]
    #[default]
    Invite,
    /// The attendee applied to join.
    #[sea_orm(string_value = "application")]
    Application,
    /// An operator added the attendee directly.
    #[sea_orm(string_value = "direct")]
    Direct,
}

/// Group membership.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room_group_members")]
pub struct Model {
    /// Badge number; primary key, so an attendee is in at most one group.
    #[sea_orm(primary_key, auto_increment = false)]
    pub attendee_id: i64,

    /// The group.
    #[sea_orm(indexed)]
    pub group_id: String,

    /// Nickname cached from the attendee registry.
    pub nickname: String,

    /// Avatar URL cached from the attendee registry.
    #[sea_orm(nullable)]
    pub avatar: Option<String>,

    /// Comma-separated flags.
    pub flags: String,

    /// Outstanding invitation or application.
    pub is_invite: bool,

    /// Who created the row.
    pub invite_type: InviteType,

    /// Secret the invitee presents to accept an invitation.
    #[sea_orm(nullable)]
    pub invite_code: Option<String>,

    /// When the row was created.
    pub created_at: DateTimeUtc,

    /// When the row was last updated.
    pub updated_at: DateTimeUtc,
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
