use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Targets, heartbeats, proxies and notification channels").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "TLS certificate info and expiry warnings").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: core tables
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            protocol TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            username TEXT,
            password TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // `settings` holds the JSON encoded TargetKind
    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL DEFAULT 1,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            settings TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            interval_secs INTEGER NOT NULL DEFAULT 60,
            retry_interval_secs INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 0,
            timeout_secs INTEGER,
            upside_down INTEGER NOT NULL DEFAULT 0,
            parent_id INTEGER REFERENCES targets(id) ON DELETE SET NULL,
            proxy_id INTEGER REFERENCES proxies(id) ON DELETE SET NULL,
            cert_expiry_warning_days INTEGER,
            push_token TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS heartbeats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            timestamp INTEGER NOT NULL,
            status INTEGER NOT NULL,
            response_time_ms INTEGER,
            message TEXT NOT NULL DEFAULT '',
            important INTEGER NOT NULL DEFAULT 0,
            retries INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            config TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS target_notifications (
            target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            channel_id INTEGER NOT NULL REFERENCES notification_channels(id) ON DELETE CASCADE,
            PRIMARY KEY (target_id, channel_id)
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_active ON targets(active)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_parent ON targets(parent_id)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_heartbeats_target_time ON heartbeats(target_id, timestamp)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_heartbeats_target_important ON heartbeats(target_id, important, timestamp)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_heartbeats_time ON heartbeats(timestamp)", ()).await?;

    Ok(())
}

/// Migration v2: certificate tracking
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tls_info (
            target_id INTEGER PRIMARY KEY REFERENCES targets(id) ON DELETE CASCADE,
            info TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificate_warnings (
            target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            fingerprint TEXT NOT NULL,
            days INTEGER NOT NULL,
            sent_at INTEGER NOT NULL,
            PRIMARY KEY (target_id, fingerprint)
        )",
        (),
    )
    .await?;

    tracing::info!("Added TLS certificate tables");
    Ok(())
}
