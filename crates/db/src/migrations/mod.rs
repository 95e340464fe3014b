//! Database migrations.
//!
//! Schema migrations for the SQL back-end.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20260101_000001_create_group_tables;
mod m20260101_000002_create_room_tables;
mod m20260101_000003_create_history_table;

/// Generated column holding `name` while the row is live and NULL once it is
/// soft-deleted. A unique index over it keeps live names unique; MySQL allows
/// any number of NULLs in a unique index.
const LIVE_NAME: &str = "GENERATED ALWAYS AS (IF(deleted_at IS NULL, name, NULL)) STORED";

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_group_tables::Migration),
            Box::new(m20260101_000002_create_room_tables::Migration),
            Box::new(m20260101_000003_create_history_table::Migration),
        ]
    }
}
