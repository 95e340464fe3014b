//! Create `room_groups`, `room_group_members`, and `room_group_bans` tables.

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
                    .table(RoomGroup::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoomGroup::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RoomGroup::Name).string_len(80).not_null())
                    .col(
                        ColumnDef::new(RoomGroup::Flags)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(RoomGroup::Comments).text().not_null())
                    .col(ColumnDef::new(RoomGroup::MaximumSize).integer().not_null())
                    .col(ColumnDef::new(RoomGroup::Owner).big_integer().not_null())
                    .col(
                        ColumnDef::new(RoomGroup::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RoomGroup::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(RoomGroup::DeletedAt).timestamp().null())
                    .col(ColumnDef::new(RoomGroup::LiveName).string_len(80).extra(LIVE_NAME))
                    .to_owned(),
            )
            .await?;

        manager.create_index(live_name_index()).await?;

        manager
            .create_table(
                Table::create()
                    .table(GroupMember::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GroupMember::AttendeeId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GroupMember::GroupId).string_len(36).not_null())
                    .col(ColumnDef::new(GroupMember::Nickname).string_len(80).not_null())
                    .col(ColumnDef::new(GroupMember::Avatar).string_len(255).null())
                    .col(
                        ColumnDef::new(GroupMember::Flags)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(GroupMember::IsInvite).boolean().not_null())
                    .col(
                        ColumnDef::new(GroupMember::InviteType)
                            .string_len(20)
                            .not_null()
                            .default("invite"),
                    )
                    .col(ColumnDef::new(GroupMember::InviteCode).string_len(64).null())
                    .col(
                        ColumnDef::new(GroupMember::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GroupMember::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_room_group_members_group")
                            .from(GroupMember::Table, GroupMember::GroupId)
                            .to(RoomGroup::Table, RoomGroup::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_room_group_members_group_id")
                    .table(GroupMember::Table)
                    .col(GroupMember::GroupId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GroupBan::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GroupBan::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GroupBan::GroupId).string_len(36).not_null())
                    .col(ColumnDef::new(GroupBan::AttendeeId).big_integer().not_null())
                    .col(
                        ColumnDef::new(GroupBan::Flags)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(GroupBan::Comments).text().not_null())
                    .col(
                        ColumnDef::new(GroupBan::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GroupBan::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(GroupBan::DeletedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_room_group_bans_group")
                            .from(GroupBan::Table, GroupBan::GroupId)
                            .to(RoomGroup::Table, RoomGroup::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_room_group_bans_group_attendee")
                    .table(GroupBan::Table)
                    .col(GroupBan::GroupId)
                    .col(GroupBan::AttendeeId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GroupBan::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GroupMember::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoomGroup::Table).to_owned())
            .await
    }
}

fn live_name_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_room_groups_live_name")
        .table(RoomGroup::Table)
        .col(RoomGroup::LiveName)
        .unique()
        .to_owned()
}

#[derive(Iden)]
enum RoomGroup {
    #[iden = "room_groups"]
    Table,
    Id,
    Name,
    Flags,
    Comments,
    MaximumSize,
    Owner,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    LiveName,
}

#[derive(Iden)]
enum GroupMember {
    #[iden = "room_group_members"]
    Table,
    AttendeeId,
    GroupId,
    Nickname,
    Avatar,
    Flags,
    IsInvite,
    InviteType,
    InviteCode,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum GroupBan {
    #[iden = "room_group_bans"]
    Table,
    Id,
    GroupId,
    AttendeeId,
    Flags,
    Comments,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
