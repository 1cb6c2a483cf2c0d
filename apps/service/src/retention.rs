//! Periodic deletion of old heartbeats.
//!
//! Heartbeats older than `keep_days` are removed once per cleanup interval.
//! A `keep_days` below 1 disables deletion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config;
use crate::database::HeartbeatStore;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days of heartbeat history to keep
    pub keep_days: i64,
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&config::Retention::default())
    }
}

impl From<&config::Retention> for RetentionPolicy {
    fn from(config: &config::Retention) -> Self {
        Self {
            keep_days: config.keep_days,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(60)),
        }
    }
}

impl RetentionPolicy {
    /// Oldest timestamp that survives a cleanup at `now`, or `None` when disabled
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.keep_days >= 1).then(|| now - chrono::Duration::days(self.keep_days))
    }
}

pub struct RetentionCleanup {
    heartbeats: Arc<dyn HeartbeatStore>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(heartbeats: Arc<dyn HeartbeatStore>, policy: RetentionPolicy) -> Self {
        Self { heartbeats, policy }
    }

    /// Delete expired heartbeats, returning how many rows went
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let Some(cutoff) = self.policy.cutoff(Utc::now()) else {
            debug!("Heartbeat retention disabled, nothing to clean");
            return Ok(0);
        };

        let deleted = self.heartbeats.delete_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, keep_days = self.policy.keep_days, "Retention cleanup completed");
        }
        Ok(deleted)
    }

    /// Spawn the background task; the first run happens immediately
    pub fn start_periodic_cleanup(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.cleanup_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.cleanup_expired().await {
                    warn!("Periodic retention cleanup failed: {:#}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TargetRepository;
    use crate::database::models::{Heartbeat, Target, TargetKind};
    use crate::monitoring::types::MonitorStatus;
    use crate::test_support::test_database;

    fn beat(target_id: i64, age: chrono::Duration) -> Heartbeat {
        Heartbeat {
            id: None,
            target_id,
            timestamp: Utc::now() - age,
            status: MonitorStatus::Up,
            response_time_ms: Some(10),
            message: "OK".into(),
            important: false,
            retries: 0,
        }
    }

    #[test]
    fn policy_from_config() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.keep_days, 180);
        assert_eq!(policy.cleanup_interval, Duration::from_secs(3600));

        let now = Utc::now();
        assert_eq!(policy.cutoff(now), Some(now - chrono::Duration::days(180)));
        assert_eq!(RetentionPolicy { keep_days: 0, ..policy }.cutoff(now), None);
    }

    #[tokio::test]
    async fn deletes_only_expired_heartbeats() {
        let (db, _dir) = test_database().await.unwrap();
        let id = db.save_target(&Target::new("api", TargetKind::Group)).await.unwrap();
        db.append(&beat(id, chrono::Duration::days(200))).await.unwrap();
        db.append(&beat(id, chrono::Duration::days(10))).await.unwrap();

        let cleanup = RetentionCleanup::new(db.clone(), RetentionPolicy::default());
        assert_eq!(cleanup.cleanup_expired().await.unwrap(), 1);
        assert_eq!(cleanup.cleanup_expired().await.unwrap(), 0);

        let left = db.query_range(id, Utc::now() - chrono::Duration::days(365)).await.unwrap();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn disabled_policy_keeps_everything() {
        let (db, _dir) = test_database().await.unwrap();
        let id = db.save_target(&Target::new("api", TargetKind::Group)).await.unwrap();
        db.append(&beat(id, chrono::Duration::days(1000))).await.unwrap();

        let policy = RetentionPolicy { keep_days: 0, cleanup_interval: Duration::from_secs(60) };
        assert_eq!(RetentionCleanup::new(db, policy).cleanup_expired().await.unwrap(), 0);
    }
}
