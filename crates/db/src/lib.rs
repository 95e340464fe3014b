//! Persistence layer for the room service.
//!
//! The cores talk to storage only through [`Repository`]. [`open`] picks the
//! back-end named by `database.use`.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use roomsvc_common::config::DatabaseKind;
use roomsvc_common::{AppError, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub use repositories::{
    FindCriteria, GroupStore, HistoryEntry, HistoryStore, InMemoryRepository, Repository,
    RoomStore, SharedRepository, SqlRepository, UNBOUNDED,
};

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(config.database.connection_url());

    opt.max_connections(config.database.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(false);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Open the configured repository, migrating the SQL schema if needed.
pub async fn open(config: &Config) -> Result<SharedRepository, AppError> {
    match config.database.kind {
        DatabaseKind::Inmemory => {
            tracing::warn!("Using in-memory repository; state is lost on restart");
            Ok(Arc::new(InMemoryRepository::new()))
        }
        DatabaseKind::Mysql => {
            let db = init(config).await?;
            migrate(&db).await?;
            tracing::info!("Database connected and migrated");
            Ok(Arc::new(SqlRepository::new(Arc::new(db))))
        }
    }
}
