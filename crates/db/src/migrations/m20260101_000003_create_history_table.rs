//! Create the `history` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(History::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(History::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(History::Entity).string_len(32).not_null())
                    .col(ColumnDef::new(History::EntityId).string_len(36).not_null())
                    .col(ColumnDef::new(History::Operation).string_len(64).not_null())
                    .col(ColumnDef::new(History::RequestedBy).string_len(255).not_null())
                    .col(ColumnDef::new(History::Diff).json().not_null())
                    .col(
                        ColumnDef::new(History::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_history_entity_id")
                    .table(History::Table)
                    .col(History::EntityId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(History::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum History {
    Table,
    Id,
    Entity,
    EntityId,
    Operation,
    RequestedBy,
    Diff,
    CreatedAt,
}
