use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};

use super::models::{Heartbeat, NotificationChannel, Proxy, ProxyProtocol, Target, TargetKind};
use crate::monitoring::types::{CertificateInfo, MonitorStatus, TargetId};
use crate::pool::LibsqlPool;

const TARGET_COLUMNS: &str = "id, owner_id, name, settings, active, interval_secs, retry_interval_secs, max_retries, timeout_secs, upside_down, parent_id, proxy_id, cert_expiry_warning_days";

const HEARTBEAT_COLUMNS: &str =
    "id, target_id, timestamp, status, response_time_ms, message, important, retries";

/// Target configuration, proxy and notification-channel registries.
///
/// The engine only reads most of this; writes come from the administrative side.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    async fn get_target(&self, id: TargetId) -> Result<Option<Target>>;

    /// All targets whose `active` flag is set
    async fn get_active_targets(&self) -> Result<Vec<Target>>;

    async fn get_children(&self, parent_id: TargetId) -> Result<Vec<Target>>;

    async fn find_target_by_name(&self, name: &str) -> Result<Option<Target>>;

    async fn find_target_by_push_token(&self, token: &str) -> Result<Option<Target>>;

    /// Insert when `target.id` is zero, update otherwise. Returns the id.
    async fn save_target(&self, target: &Target) -> Result<TargetId>;

    async fn set_active(&self, id: TargetId, active: bool) -> Result<()>;

    /// Delete a target; heartbeats and bindings go with it
    async fn delete_target(&self, id: TargetId) -> Result<()>;

    async fn get_proxy(&self, id: i64) -> Result<Option<Proxy>>;

    async fn find_proxy_by_name(&self, name: &str) -> Result<Option<Proxy>>;

    async fn save_proxy(&self, proxy: &Proxy) -> Result<i64>;

    async fn get_channel(&self, id: i64) -> Result<Option<NotificationChannel>>;

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<NotificationChannel>>;

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<i64>;

    /// Channels bound to a target
    async fn get_channels_for_target(&self, target_id: TargetId) -> Result<Vec<NotificationChannel>>;

    /// Replace the set of channels bound to a target
    async fn set_target_channels(&self, target_id: TargetId, channel_ids: &[i64]) -> Result<()>;
}

/// Append-only heartbeat history plus per-target certificate bookkeeping.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn append(&self, heartbeat: &Heartbeat) -> Result<i64>;

    /// Most recent heartbeat of a target
    async fn latest(&self, target_id: TargetId) -> Result<Option<Heartbeat>>;

    /// Most recent heartbeat strictly before `before`
    async fn latest_before(&self, target_id: TargetId, before: DateTime<Utc>) -> Result<Option<Heartbeat>>;

    /// Heartbeats at or after `since`, oldest first
    async fn query_range(&self, target_id: TargetId, since: DateTime<Utc>) -> Result<Vec<Heartbeat>>;

    /// Important heartbeats only, oldest first
    async fn query_important(&self, target_id: TargetId) -> Result<Vec<Heartbeat>>;

    /// Delete every heartbeat of a target
    async fn clear_all(&self, target_id: TargetId) -> Result<u64>;

    /// Reset `important` (and the message) without deleting rows
    async fn clear_important_markers(&self, target_id: TargetId) -> Result<u64>;

    /// Delete every heartbeat of every target
    async fn clear_all_statistics(&self) -> Result<u64>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn save_tls_info(&self, target_id: TargetId, info: &CertificateInfo) -> Result<()>;

    async fn get_tls_info(&self, target_id: TargetId) -> Result<Option<CertificateInfo>>;

    async fn certificate_warning_sent(&self, target_id: TargetId, fingerprint: &str) -> Result<bool>;

    async fn record_certificate_warning(&self, target_id: TargetId, fingerprint: &str, days: i64) -> Result<()>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {e}"))
    }

    async fn query_targets(&self, sql: &str, values: impl libsql::params::IntoParams) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, values).await?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }

    async fn query_heartbeats(&self, sql: &str, values: impl libsql::params::IntoParams) -> Result<Vec<Heartbeat>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, values).await?;
        let mut heartbeats = Vec::new();
        while let Some(row) = rows.next().await? {
            heartbeats.push(heartbeat_from_row(&row)?);
        }
        Ok(heartbeats)
    }

    async fn query_channels(&self, sql: &str, values: impl libsql::params::IntoParams) -> Result<Vec<NotificationChannel>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, values).await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            let config: String = row.get(2)?;
            channels.push(NotificationChannel {
                id: row.get(0)?,
                name: row.get(1)?,
                config: serde_json::from_str(&config).context("Malformed notification channel config")?,
            });
        }
        Ok(channels)
    }

    async fn query_proxy(&self, sql: &str, values: impl libsql::params::IntoParams) -> Result<Option<Proxy>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, values).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let protocol: String = row.get(2)?;
        Ok(Some(Proxy {
            id: row.get(0)?,
            name: row.get(1)?,
            protocol: ProxyProtocol::from_scheme(&protocol)
                .ok_or_else(|| anyhow!("Unknown proxy protocol: {}", protocol))?,
            host: row.get(3)?,
            port: row.get::<i64>(4)? as u16,
            username: row.get(5)?,
            password: row.get(6)?,
        }))
    }
}

fn target_from_row(row: &Row) -> Result<Target> {
    let settings: String = row.get(3)?;
    let kind: TargetKind = serde_json::from_str(&settings).context("Malformed target settings")?;

    Ok(Target {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        active: row.get::<i64>(4)? != 0,
        interval_secs: row.get::<i64>(5)? as u64,
        retry_interval_secs: row.get::<i64>(6)? as u64,
        max_retries: row.get::<i64>(7)? as u32,
        timeout_secs: row.get::<Option<i64>>(8)?.map(|v| v as u64),
        upside_down: row.get::<i64>(9)? != 0,
        parent_id: row.get(10)?,
        proxy_id: row.get(11)?,
        cert_expiry_warning_days: row.get::<Option<i64>>(12)?.map(|v| v as u32),
        kind,
    })
}

fn heartbeat_from_row(row: &Row) -> Result<Heartbeat> {
    let status_code: i64 = row.get(3)?;

    Ok(Heartbeat {
        id: Some(row.get(0)?),
        target_id: row.get(1)?,
        timestamp: Heartbeat::i64_to_timestamp(row.get(2)?),
        status: MonitorStatus::from_code(status_code)
            .ok_or_else(|| anyhow!("Unknown heartbeat status code: {}", status_code))?,
        response_time_ms: row.get::<Option<i64>>(4)?.map(|v| v as u64),
        message: row.get(5)?,
        important: row.get::<i64>(6)? != 0,
        retries: row.get::<i64>(7)? as u32,
    })
}

async fn first_target(conn: &Connection, sql: &str, values: impl libsql::params::IntoParams) -> Result<Option<Target>> {
    let mut rows = conn.query(sql, values).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(target_from_row(&row)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl TargetRepository for DatabaseImpl {
    async fn get_target(&self, id: TargetId) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        first_target(&conn, &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?"), params![id]).await
    }

    async fn get_active_targets(&self) -> Result<Vec<Target>> {
        self.query_targets(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE active = 1 ORDER BY id"), ())
            .await
    }

    async fn get_children(&self, parent_id: TargetId) -> Result<Vec<Target>> {
        self.query_targets(
            &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE parent_id = ? ORDER BY id"),
            params![parent_id],
        )
        .await
    }

    async fn find_target_by_name(&self, name: &str) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        first_target(&conn, &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE name = ?"), params![name]).await
    }

    async fn find_target_by_push_token(&self, token: &str) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        first_target(&conn, &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE push_token = ?"), params![token])
            .await
    }

    async fn save_target(&self, target: &Target) -> Result<TargetId> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();
        let settings = serde_json::to_string(&target.kind)?;
        let push_token = target.push_token().map(str::to_string);

        if target.id > 0 {
            conn.execute(
                "UPDATE targets SET owner_id = ?, name = ?, kind = ?, settings = ?, active = ?, interval_secs = ?, retry_interval_secs = ?, max_retries = ?, timeout_secs = ?, upside_down = ?, parent_id = ?, proxy_id = ?, cert_expiry_warning_days = ?, push_token = ?, updated_at = ? WHERE id = ?",
                params![
                    target.owner_id,
                    target.name.clone(),
                    target.kind.name(),
                    settings,
                    if target.active { 1 } else { 0 },
                    target.interval_secs as i64,
                    target.retry_interval_secs as i64,
                    target.max_retries as i64,
                    target.timeout_secs.map(|v| v as i64),
                    if target.upside_down { 1 } else { 0 },
                    target.parent_id,
                    target.proxy_id,
                    target.cert_expiry_warning_days.map(|v| v as i64),
                    push_token,
                    now,
                    target.id
                ],
            )
            .await?;
            Ok(target.id)
        } else {
            conn.execute(
                "INSERT INTO targets (owner_id, name, kind, settings, active, interval_secs, retry_interval_secs, max_retries, timeout_secs, upside_down, parent_id, proxy_id, cert_expiry_warning_days, push_token, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    target.owner_id,
                    target.name.clone(),
                    target.kind.name(),
                    settings,
                    if target.active { 1 } else { 0 },
                    target.interval_secs as i64,
                    target.retry_interval_secs as i64,
                    target.max_retries as i64,
                    target.timeout_secs.map(|v| v as i64),
                    if target.upside_down { 1 } else { 0 },
                    target.parent_id,
                    target.proxy_id,
                    target.cert_expiry_warning_days.map(|v| v as i64),
                    push_token,
                    now,
                    now
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }

    async fn set_active(&self, id: TargetId, active: bool) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE targets SET active = ?, updated_at = ? WHERE id = ?",
            params![if active { 1 } else { 0 }, Utc::now().timestamp(), id],
        )
        .await?;
        Ok(())
    }

    async fn delete_target(&self, id: TargetId) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM targets WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn get_proxy(&self, id: i64) -> Result<Option<Proxy>> {
        self.query_proxy(
            "SELECT id, name, protocol, host, port, username, password FROM proxies WHERE id = ?",
            params![id],
        )
        .await
    }

    async fn find_proxy_by_name(&self, name: &str) -> Result<Option<Proxy>> {
        self.query_proxy(
            "SELECT id, name, protocol, host, port, username, password FROM proxies WHERE name = ?",
            params![name],
        )
        .await
    }

    async fn save_proxy(&self, proxy: &Proxy) -> Result<i64> {
        let conn = self.get_conn().await?;
        if proxy.id > 0 {
            conn.execute(
                "UPDATE proxies SET name = ?, protocol = ?, host = ?, port = ?, username = ?, password = ? WHERE id = ?",
                params![
                    proxy.name.clone(),
                    proxy.protocol.scheme(),
                    proxy.host.clone(),
                    proxy.port as i64,
                    proxy.username.clone(),
                    proxy.password.clone(),
                    proxy.id
                ],
            )
            .await?;
            Ok(proxy.id)
        } else {
            conn.execute(
                "INSERT INTO proxies (name, protocol, host, port, username, password, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    proxy.name.clone(),
                    proxy.protocol.scheme(),
                    proxy.host.clone(),
                    proxy.port as i64,
                    proxy.username.clone(),
                    proxy.password.clone(),
                    Utc::now().timestamp()
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }

    async fn get_channel(&self, id: i64) -> Result<Option<NotificationChannel>> {
        let mut channels = self
            .query_channels("SELECT id, name, config FROM notification_channels WHERE id = ?", params![id])
            .await?;
        Ok(channels.pop())
    }

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<NotificationChannel>> {
        let mut channels = self
            .query_channels("SELECT id, name, config FROM notification_channels WHERE name = ?", params![name])
            .await?;
        Ok(channels.pop())
    }

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<i64> {
        let conn = self.get_conn().await?;
        let config = serde_json::to_string(&channel.config)?;
        if channel.id > 0 {
            conn.execute(
                "UPDATE notification_channels SET name = ?, config = ? WHERE id = ?",
                params![channel.name.clone(), config, channel.id],
            )
            .await?;
            Ok(channel.id)
        } else {
            conn.execute(
                "INSERT INTO notification_channels (name, config, created_at) VALUES (?, ?, ?)",
                params![channel.name.clone(), config, Utc::now().timestamp()],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }

    async fn get_channels_for_target(&self, target_id: TargetId) -> Result<Vec<NotificationChannel>> {
        self.query_channels(
            "SELECT c.id, c.name, c.config FROM notification_channels c
             JOIN target_notifications tn ON tn.channel_id = c.id
             WHERE tn.target_id = ? ORDER BY c.id",
            params![target_id],
        )
        .await
    }

    async fn set_target_channels(&self, target_id: TargetId, channel_ids: &[i64]) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM target_notifications WHERE target_id = ?", params![target_id]).await?;
        for channel_id in channel_ids {
            tx.execute(
                "INSERT OR IGNORE INTO target_notifications (target_id, channel_id) VALUES (?, ?)",
                params![target_id, *channel_id],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for DatabaseImpl {
    async fn append(&self, heartbeat: &Heartbeat) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO heartbeats (target_id, timestamp, status, response_time_ms, message, important, retries) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                heartbeat.target_id,
                Heartbeat::timestamp_to_i64(heartbeat.timestamp),
                heartbeat.status.code(),
                heartbeat.response_time_ms.map(|v| v as i64),
                heartbeat.message.clone(),
                if heartbeat.important { 1 } else { 0 },
                heartbeat.retries as i64
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn latest(&self, target_id: TargetId) -> Result<Option<Heartbeat>> {
        let mut heartbeats = self
            .query_heartbeats(
                &format!(
                    "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE target_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![target_id],
            )
            .await?;
        Ok(heartbeats.pop())
    }

    async fn latest_before(&self, target_id: TargetId, before: DateTime<Utc>) -> Result<Option<Heartbeat>> {
        let mut heartbeats = self
            .query_heartbeats(
                &format!(
                    "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE target_id = ? AND timestamp < ? ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![target_id, Heartbeat::timestamp_to_i64(before)],
            )
            .await?;
        Ok(heartbeats.pop())
    }

    async fn query_range(&self, target_id: TargetId, since: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
        self.query_heartbeats(
            &format!(
                "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE target_id = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC"
            ),
            params![target_id, Heartbeat::timestamp_to_i64(since)],
        )
        .await
    }

    async fn query_important(&self, target_id: TargetId) -> Result<Vec<Heartbeat>> {
        self.query_heartbeats(
            &format!(
                "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE target_id = ? AND important = 1 ORDER BY timestamp ASC, id ASC"
            ),
            params![target_id],
        )
        .await
    }

    async fn clear_all(&self, target_id: TargetId) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM heartbeats WHERE target_id = ?", params![target_id]).await?)
    }

    async fn clear_important_markers(&self, target_id: TargetId) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn
            .execute(
                "UPDATE heartbeats SET important = 0, message = '' WHERE target_id = ?",
                params![target_id],
            )
            .await?)
    }

    async fn clear_all_statistics(&self) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM heartbeats", ()).await?)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn
            .execute("DELETE FROM heartbeats WHERE timestamp < ?", params![Heartbeat::timestamp_to_i64(cutoff)])
            .await?)
    }

    async fn save_tls_info(&self, target_id: TargetId, info: &CertificateInfo) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO tls_info (target_id, info, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(target_id) DO UPDATE SET info = excluded.info, updated_at = excluded.updated_at",
            params![target_id, serde_json::to_string(info)?, Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }

    async fn get_tls_info(&self, target_id: TargetId) -> Result<Option<CertificateInfo>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT info FROM tls_info WHERE target_id = ?", params![target_id]).await?;
        match rows.next().await? {
            Some(row) => {
                let info: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&info)?))
            }
            None => Ok(None),
        }
    }

    async fn certificate_warning_sent(&self, target_id: TargetId, fingerprint: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM certificate_warnings WHERE target_id = ? AND fingerprint = ?",
                params![target_id, fingerprint],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn record_certificate_warning(&self, target_id: TargetId, fingerprint: &str, days: i64) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO certificate_warnings (target_id, fingerprint, days, sent_at) VALUES (?, ?, ?, ?)",
            params![target_id, fingerprint, days, Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }
}
