use std::sync::Arc;

use async_trait::async_trait;

use super::checker::Checker;
use super::types::{MonitorStatus, ProbeResult, TargetId};
use crate::database::{HeartbeatStore, TargetRepository};

/// Derives a group's status from its children's latest heartbeats
pub struct GroupChecker {
    group_id: TargetId,
    targets: Arc<dyn TargetRepository>,
    heartbeats: Arc<dyn HeartbeatStore>,
}

impl GroupChecker {
    pub fn new(group_id: TargetId, targets: Arc<dyn TargetRepository>, heartbeats: Arc<dyn HeartbeatStore>) -> Self {
        Self { group_id, targets, heartbeats }
    }

    async fn failing_children(&self) -> anyhow::Result<Vec<String>> {
        let mut failing = Vec::new();
        for child in self.targets.get_children(self.group_id).await? {
            if let Some(beat) = self.heartbeats.latest(child.id).await? {
                if matches!(beat.status, MonitorStatus::Down | MonitorStatus::Pending) {
                    failing.push(child.name);
                }
            }
        }
        Ok(failing)
    }
}

#[async_trait]
impl Checker for GroupChecker {
    async fn check(&self) -> ProbeResult {
        match self.failing_children().await {
            Ok(failing) if failing.is_empty() => ProbeResult::up(0, "All children up and running"),
            Ok(failing) => ProbeResult::down(format!("Child inaccessible: {}", failing.join(", "))).with_latency(0),
            Err(e) => ProbeResult::down(format!("Could not read child status: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Heartbeat, Target, TargetKind};
    use crate::test_support::test_database;
    use chrono::Utc;

    async fn beat(db: &crate::database::DatabaseImpl, target_id: TargetId, status: MonitorStatus) {
        db.append(&Heartbeat {
            id: None,
            target_id,
            timestamp: Utc::now(),
            status,
            response_time_ms: None,
            message: String::new(),
            important: false,
            retries: 0,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn group_follows_children() {
        let (db, _dir) = test_database().await.unwrap();
        let group = db.save_target(&Target::new("group", TargetKind::Group)).await.unwrap();

        let checker = GroupChecker::new(group, db.clone(), db.clone());
        assert!(checker.check().await.success, "empty group counts as up");

        let mut child = Target::new("child", TargetKind::Group);
        child.parent_id = Some(group);
        let child_id = db.save_target(&child).await.unwrap();

        beat(&db, child_id, MonitorStatus::Up).await;
        assert!(checker.check().await.success);

        beat(&db, child_id, MonitorStatus::Pending).await;
        let result = checker.check().await;
        assert!(!result.success);
        assert!(result.message.contains("child"));

        beat(&db, child_id, MonitorStatus::Maintenance).await;
        assert!(checker.check().await.success);
    }
}
