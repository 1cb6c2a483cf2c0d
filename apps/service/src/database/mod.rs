/// Database abstraction layer
///
/// Targets, heartbeats, proxies and notification channels live in a local
/// libsql database reached through a deadpool connection pool.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{DatabaseImpl, HeartbeatStore, TargetRepository};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
