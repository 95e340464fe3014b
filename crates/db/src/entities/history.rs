//! Append-only audit log of mutating operations.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// History entry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Kind of entity, e.g. `group` or `room`.
    pub entity: String,

    /// Id of the changed entity.
    #[sea_orm(indexed)]
    pub entity_id: String,

    /// Operation, e.g. `create` or `member.add`.
    pub operation: String,

    /// Who asked for the change.
    pub requested_by: String,

    /// Opaque description of the change.
    #[sea_orm(column_type = "Json")]
    pub diff: Json,

    /// When the change happened.
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
