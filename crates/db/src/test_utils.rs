//! Test utilities for database operations.
//!
//! Provides helpers for setting up and tearing down a MySQL test database.

use std::sync::Arc;

use sea_orm::{Database, DatabaseConnection, DbErr, EntityTrait};
use tracing::info;

use crate::entities::{group_ban, group_member, history, room, room_group, room_member};
use crate::repositories::SqlRepository;

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3307),
            username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "roomsvc_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "roomsvc_test".to_string()),
            database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "roomsvc_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
    /// Database configuration.
    pub config: TestDbConfig,
}

impl TestDatabase {
    /// Connect with the default configuration and run migrations.
    pub async fn new() -> Result<Self, DbErr> {
        Self::with_config(TestDbConfig::default()).await
    }

    /// Connect with a custom configuration and run migrations.
    pub async fn with_config(config: TestDbConfig) -> Result<Self, DbErr> {
        use sea_orm_migration::MigratorTrait;

        let conn = Database::connect(&config.database_url()).await?;
        crate::migrations::Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Connected to test database");

        Ok(Self {
            conn: Arc::new(conn),
            config,
        })
    }

    /// A repository on this database.
    #[must_use]
    pub fn repository(&self) -> SqlRepository {
        SqlRepository::new(Arc::clone(&self.conn))
    }

    /// Remove all rows, children first.
    pub async fn cleanup(&self) -> Result<(), DbErr> {
        let conn = self.conn.as_ref();
        room_member::Entity::delete_many().exec(conn).await?;
        room::Entity::delete_many().exec(conn).await?;
        group_member::Entity::delete_many().exec(conn).await?;
        group_ban::Entity::delete_many().exec(conn).await?;
        room_group::Entity::delete_many().exec(conn).await?;
        history::Entity::delete_many().exec(conn).await?;

        info!("Cleaned up test database");
        Ok(())
    }
}
