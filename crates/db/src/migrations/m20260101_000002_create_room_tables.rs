//! Create `rooms` and `room_members` tables.

use sea_orm_migration::prelude::*;

use super::LIVE_NAME;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Room::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Room::Id).string_len(36).not_null().primary_key())
                    .col(ColumnDef::new(Room::Name).string_len(50).not_null())
                    .col(
                        ColumnDef::new(Room::Flags)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Room::Comments).text().not_null())
                    .col(ColumnDef::new(Room::Size).integer().not_null())
                    .col(
                        ColumnDef::new(Room::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Room::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Room::DeletedAt).timestamp().null())
                    .col(ColumnDef::new(Room::LiveName).string_len(50).extra(LIVE_NAME))
                    .to_owned(),
            )
            .await?;

        manager.create_index(live_name_index()).await?;

        manager
            .create_table(
                Table::create()
                    .table(RoomMember::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoomMember::AttendeeId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RoomMember::RoomId).string_len(36).not_null())
                    .col(ColumnDef::new(RoomMember::Nickname).string_len(80).not_null())
                    .col(ColumnDef::new(RoomMember::Avatar).string_len(255).null())
                    .col(
                        ColumnDef::new(RoomMember::Flags)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(RoomMember::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RoomMember::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_room_members_room")
                            .from(RoomMember::Table, RoomMember::RoomId)
                            .to(Room::Table, Room::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_room_members_room_id")
                    .table(RoomMember::Table)
                    .col(RoomMember::RoomId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RoomMember::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Room::Table).to_owned())
            .await
    }
}

fn live_name_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_rooms_live_name")
        .table(Room::Table)
        .col(Room::LiveName)
        .unique()
        .to_owned()
}

#[derive(Iden)]
enum Room {
    #[iden = "rooms"]
    Table,
    Id,
    Name,
    Flags,
    Comments,
    Size,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    LiveName,
}

#[derive(Iden)]
enum RoomMember {
    #[iden = "room_members"]
    Table,
    AttendeeId,
    RoomId,
    Nickname,
    Avatar,
    Flags,
    CreatedAt,
    UpdatedAt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_name_index_is_unique() {
        let sql = live_name_index().to_string(MysqlQueryBuilder);
        assert!(sql.contains("UNIQUE"), "{sql}");
        assert!(sql.contains("`live_name`"), "{sql}");
    }

    #[test]
    fn test_live_name_is_generated_from_name() {
        let sql = Table::create()
            .table(Room::Table)
            .col(ColumnDef::new(Room::LiveName).string_len(50).extra(LIVE_NAME))
            .to_string(MysqlQueryBuilder);
        assert!(sql.contains("IF(deleted_at IS NULL, name, NULL)"), "{sql}");
        assert!(sql.contains("STORED"), "{sql}");
    }
}
