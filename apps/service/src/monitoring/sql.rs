use std::sync::Once;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{AnyConnection, Connection, Executor};

use super::checker::Checker;
use super::types::ProbeResult;
use crate::database::models::DatabaseSettings;

static INSTALL_DRIVERS: Once = Once::new();

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    /// postgres and mysql through sqlx
    Server(String),
    /// local sqlite file through libsql
    Sqlite(String),
}

/// Runs a query and succeeds when it executes without error
pub struct SqlChecker {
    backend: Backend,
    query: String,
    timeout_duration: Duration,
}

impl SqlChecker {
    pub fn new(settings: &DatabaseSettings, timeout_duration: Duration) -> Result<Self, String> {
        let backend = parse_backend(settings.connection_string.trim())?;
        if settings.query.trim().is_empty() {
            return Err("query is empty".to_string());
        }
        Ok(Self { backend, query: settings.query.clone(), timeout_duration })
    }

    async fn run_server(&self, url: &str) -> Result<(), String> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let mut conn = AnyConnection::connect(url).await.map_err(|e| e.to_string())?;
        let outcome = (&mut conn).execute(self.query.as_str()).await.map(|_| ()).map_err(|e| e.to_string());
        let _ = conn.close().await;
        outcome
    }

    async fn run_sqlite(&self, path: &str) -> Result<(), String> {
        let database = libsql::Builder::new_local(path).build().await.map_err(|e| e.to_string())?;
        let conn = database.connect().map_err(|e| e.to_string())?;
        let mut rows = conn.query(&self.query, ()).await.map_err(|e| e.to_string())?;
        rows.next().await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn parse_backend(connection_string: &str) -> Result<Backend, String> {
    let (scheme, rest) = connection_string
        .split_once("://")
        .or_else(|| connection_string.split_once(':'))
        .ok_or_else(|| "connection string has no scheme".to_string())?;

    match scheme.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "mysql" | "mariadb" => {
            // sqlx registers mariadb servers under the mysql scheme
            let url = if scheme.eq_ignore_ascii_case("mariadb") {
                format!("mysql://{rest}")
            } else {
                connection_string.to_string()
            };
            Ok(Backend::Server(url))
        }
        "sqlite" | "file" if !rest.is_empty() => Ok(Backend::Sqlite(rest.to_string())),
        other => Err(format!("unsupported database scheme `{other}`")),
    }
}

#[async_trait]
impl Checker for SqlChecker {
    async fn check(&self) -> ProbeResult {
        let start = Instant::now();
        let run = async {
            match &self.backend {
                Backend::Server(url) => self.run_server(url).await,
                Backend::Sqlite(path) => self.run_sqlite(path).await,
            }
        };

        match tokio::time::timeout(self.timeout_duration, run).await {
            Ok(Ok(())) => {
                let latency = start.elapsed().as_millis() as u64;
                ProbeResult::up(latency, "Query executed")
            }
            Ok(Err(message)) => ProbeResult::down(message),
            Err(_) => ProbeResult::down("Query timeout"),
        }
    }
}
