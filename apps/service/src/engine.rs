//! Facade tying the scheduler, the store and the dispatcher together.
//!
//! Collaborators (an admin API, a dashboard, the push receiver) only talk to
//! [`Engine`]; everything below it is wired up here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config;
use crate::database::models::{Heartbeat, Target};
use crate::database::{DatabaseImpl, HeartbeatStore, TargetRepository};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::monitoring::checker::{CheckerFactory, ProbeFactory};
use crate::monitoring::executor::{LoopServices, MaintenanceSet};
use crate::monitoring::push::PushSignal;
use crate::monitoring::scheduler::{LoopState, MonitoringScheduler};
use crate::monitoring::types::{CertificateInfo, MonitorStatus, TargetId};
use crate::notification::Dispatcher;
use crate::notification::models::{ChannelConfig, Notice};
use crate::notification::senders::SenderError;
use crate::uptime::{self, TargetSummary, Uptime};

/// What a viewer should show for a target right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum MonitorState {
    Up,
    Down,
    Pending,
    Maintenance,
    /// Start was refused; carries the configuration problem
    Misconfigured(String),
    /// Running but no heartbeat recorded yet
    NoData,
    Stopped,
}

impl From<MonitorStatus> for MonitorState {
    fn from(status: MonitorStatus) -> Self {
        match status {
            MonitorStatus::Up => MonitorState::Up,
            MonitorStatus::Down => MonitorState::Down,
            MonitorStatus::Pending => MonitorState::Pending,
            MonitorStatus::Maintenance => MonitorState::Maintenance,
        }
    }
}

pub struct Engine {
    targets: Arc<dyn TargetRepository>,
    heartbeats: Arc<dyn HeartbeatStore>,
    services: Arc<LoopServices>,
    scheduler: MonitoringScheduler,
    settings: config::Engine,
}

impl Engine {
    pub fn new(db: Arc<DatabaseImpl>, settings: config::Engine) -> Self {
        let factory = Arc::new(ProbeFactory::new(db.clone(), db.clone()));
        Self::with_factory(db.clone(), db, factory, settings)
    }

    pub fn with_factory(
        targets: Arc<dyn TargetRepository>,
        heartbeats: Arc<dyn HeartbeatStore>,
        factory: Arc<dyn CheckerFactory>,
        settings: config::Engine,
    ) -> Self {
        let services = Arc::new(LoopServices {
            targets: Arc::clone(&targets),
            heartbeats: Arc::clone(&heartbeats),
            dispatcher: Arc::new(Dispatcher::new(settings.notification_timeout())),
            events: EventBus::new(settings.event_capacity),
            maintenance: MaintenanceSet::default(),
            push_grace: settings.push_grace(),
        });
        let scheduler = MonitoringScheduler::new(factory, Arc::clone(&services), settings.stop_timeout());
        Self { targets, heartbeats, services, scheduler, settings }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.services.events.subscribe()
    }

    async fn load(&self, id: TargetId) -> Result<Target, EngineError> {
        self.targets.get_target(id).await?.ok_or(EngineError::TargetNotFound(id))
    }

    // Lifecycle

    /// Start a target's loop with an immediate first tick
    pub async fn start(&self, id: TargetId) -> Result<(), EngineError> {
        let target = self.load(id).await?;
        self.scheduler.start(target, Duration::ZERO).await
    }

    /// Idempotent; returns whether a loop was running
    pub async fn stop(&self, id: TargetId) -> bool {
        self.scheduler.stop(id).await
    }

    pub async fn restart(&self, id: TargetId) -> Result<(), EngineError> {
        self.scheduler.stop(id).await;
        self.start(id).await
    }

    /// Resume every active target, staggering first ticks by a random delay each.
    /// Misconfigured targets are logged and skipped. Returns how many loops started.
    pub async fn start_all(&self) -> Result<usize, EngineError> {
        let targets = self.targets.get_active_targets().await?;
        let (min, max) = self.jitter_range();

        let mut started = 0;
        let mut delay = Duration::ZERO;
        for target in targets {
            let id = target.id;
            match self.scheduler.start(target, delay).await {
                Ok(()) => started += 1,
                Err(EngineError::InvalidConfig { reason, .. }) => {
                    warn!(target_id = id, "Skipping misconfigured target: {}", reason);
                }
                Err(EngineError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
            delay += Duration::from_millis(rand::thread_rng().gen_range(min..=max));
        }

        info!(started, "Monitoring started");
        Ok(started)
    }

    fn jitter_range(&self) -> (u64, u64) {
        let min = self.settings.start_jitter_min_ms;
        (min, self.settings.start_jitter_max_ms.max(min))
    }

    pub async fn stop_all(&self) -> usize {
        let stopped = self.scheduler.stop_all().await;
        info!(stopped, "Monitoring stopped");
        stopped
    }

    /// Stop and persist `active = false`
    pub async fn pause(&self, id: TargetId) -> Result<(), EngineError> {
        self.load(id).await?;
        self.targets.set_active(id, false).await?;
        self.scheduler.stop(id).await;
        Ok(())
    }

    /// Persist `active = true` and start
    pub async fn resume(&self, id: TargetId) -> Result<(), EngineError> {
        self.load(id).await?;
        self.targets.set_active(id, true).await?;
        match self.start(id).await {
            Err(EngineError::AlreadyRunning(_)) => Ok(()),
            other => other,
        }
    }

    /// Insert or update a target, then bring its loop in line with `active`
    pub async fn save_target(&self, target: &Target) -> Result<TargetId, EngineError> {
        let id = self.targets.save_target(target).await?;
        if target.active {
            self.restart(id).await?;
        } else {
            self.scheduler.stop(id).await;
        }
        Ok(id)
    }

    /// Stop the loop and remove the target with its history
    pub async fn delete_target(&self, id: TargetId) -> Result<(), EngineError> {
        self.scheduler.forget(id).await;
        self.services.maintenance.set(id, false);
        self.targets.delete_target(id).await?;
        info!(target_id = id, "Target deleted");
        Ok(())
    }

    pub fn set_maintenance(&self, id: TargetId, enabled: bool) {
        info!(target_id = id, enabled, "Maintenance toggled");
        self.services.maintenance.set(id, enabled);
    }

    /// Route an inbound push signal to the loop owning `token`
    pub async fn push(&self, token: &str, signal: PushSignal) -> Result<TargetId, EngineError> {
        let target = self.targets.find_target_by_push_token(token).await?.ok_or(EngineError::UnknownPushToken)?;
        self.scheduler.push(target.id, signal).await?;
        Ok(target.id)
    }

    // Reads

    /// Heartbeats of the last `hours`, oldest first
    pub async fn get_heartbeats(&self, id: TargetId, hours: u32) -> Result<Vec<Heartbeat>, EngineError> {
        let since = window_start(Utc::now(), chrono::Duration::hours(i64::from(hours)));
        Ok(self.heartbeats.query_range(id, since).await?)
    }

    /// Oldest first
    pub async fn get_important_heartbeats(&self, id: TargetId) -> Result<Vec<Heartbeat>, EngineError> {
        Ok(self.heartbeats.query_important(id).await?)
    }

    pub async fn get_uptime(&self, id: TargetId, window: chrono::Duration) -> Result<Uptime, EngineError> {
        let now = Utc::now();
        let (uptime, _) = self.window(id, window, now).await?;
        Ok(uptime)
    }

    async fn window(
        &self,
        id: TargetId,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(Uptime, Vec<Heartbeat>), EngineError> {
        let start = window_start(now, window);
        let before = self.heartbeats.latest_before(id, start).await?;
        let beats = self.heartbeats.query_range(id, start).await?;
        Ok((uptime::compute(before.as_ref(), &beats, start, now), beats))
    }

    pub async fn summary(&self, id: TargetId) -> Result<TargetSummary, EngineError> {
        self.load(id).await?;
        let now = Utc::now();
        let (uptime_24h, day) = self.window(id, chrono::Duration::hours(24), now).await?;
        let (uptime_30d, _) = self.window(id, chrono::Duration::days(30), now).await?;
        let last_heartbeat = self.heartbeats.latest(id).await?;

        Ok(TargetSummary {
            target_id: id,
            status: last_heartbeat.as_ref().map(|beat| beat.status),
            last_heartbeat,
            uptime_24h,
            uptime_30d,
            avg_response_ms_24h: uptime::average_response_ms(&day),
            certificate: self.heartbeats.get_tls_info(id).await?,
        })
    }

    pub async fn monitor_state(&self, id: TargetId) -> Result<MonitorState, EngineError> {
        self.load(id).await?;
        match self.scheduler.state(id).await {
            LoopState::Misconfigured(reason) => Ok(MonitorState::Misconfigured(reason)),
            LoopState::Stopped => Ok(MonitorState::Stopped),
            LoopState::Running { .. } => Ok(match self.heartbeats.latest(id).await? {
                Some(beat) => beat.status.into(),
                None => MonitorState::NoData,
            }),
        }
    }

    pub async fn tls_info(&self, id: TargetId) -> Result<Option<CertificateInfo>, EngineError> {
        Ok(self.heartbeats.get_tls_info(id).await?)
    }

    // Destructive

    pub async fn clear_heartbeats(&self, id: TargetId) -> Result<u64, EngineError> {
        let removed = self.heartbeats.clear_all(id).await?;
        info!(target_id = id, removed, "Heartbeats cleared");
        Ok(removed)
    }

    pub async fn clear_important_markers(&self, id: TargetId) -> Result<u64, EngineError> {
        Ok(self.heartbeats.clear_important_markers(id).await?)
    }

    pub async fn clear_all_statistics(&self) -> Result<u64, EngineError> {
        let removed = self.heartbeats.clear_all_statistics().await?;
        info!(removed, "All statistics cleared");
        Ok(removed)
    }

    /// Send a test notice through a channel that may not be saved yet
    pub async fn test_notification(&self, config: &ChannelConfig) -> Result<(), SenderError> {
        self.services.dispatcher.send(config, &Notice::test()).await
    }
}

/// Start of a lookback window; windows reaching past the representable range start at its minimum
fn window_start(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{HttpSettings, PushSettings, TargetKind};
    use crate::test_support::test_database;

    async fn engine() -> (Engine, Arc<DatabaseImpl>, tempfile::TempDir) {
        let (db, dir) = test_database().await.unwrap();
        (Engine::new(db.clone(), config::Engine::default()), db, dir)
    }

    /// Poll until the target has at least `count` heartbeats
    async fn wait_for_beats(engine: &Engine, id: TargetId, count: usize) -> Vec<Heartbeat> {
        for _ in 0..200 {
            let beats = engine.get_heartbeats(id, 1).await.unwrap();
            if beats.len() >= count {
                return beats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("target {id} never reached {count} heartbeats");
    }

    #[tokio::test]
    async fn unknown_target_is_reported() {
        let (engine, _db, _dir) = engine().await;
        assert!(matches!(engine.start(42).await, Err(EngineError::TargetNotFound(42))));
        assert!(matches!(engine.monitor_state(42).await, Err(EngineError::TargetNotFound(42))));
        assert!(!engine.stop(42).await);
    }

    #[tokio::test]
    async fn group_without_children_comes_up() {
        let (engine, _db, _dir) = engine().await;
        let mut events = engine.subscribe();

        let id = engine.save_target(&Target::new("group", TargetKind::Group)).await.unwrap();
        let beats = wait_for_beats(&engine, id, 1).await;
        assert_eq!(beats[0].status, MonitorStatus::Up);
        assert!(beats[0].important);

        assert_eq!(engine.monitor_state(id).await.unwrap(), MonitorState::Up);
        assert!(matches!(events.recv().await.unwrap(), EngineEvent::Heartbeat(_)));
        assert!(matches!(events.recv().await.unwrap(), EngineEvent::Transition { status: MonitorStatus::Up, .. }));

        let summary = engine.summary(id).await.unwrap();
        assert_eq!(summary.status, Some(MonitorStatus::Up));
        assert_eq!(summary.uptime_24h.ratio(), Some(1.0));

        assert!(engine.stop(id).await);
        assert_eq!(engine.monitor_state(id).await.unwrap(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn misconfigured_target_reports_reason() {
        let (engine, _db, _dir) = engine().await;
        let target = Target::new("bad", TargetKind::Http(HttpSettings::get("ftp://example.com")));

        let err = engine.save_target(&target).await.unwrap_err();
        let EngineError::InvalidConfig { target_id, .. } = &err else {
            panic!("expected InvalidConfig, got {err:?}");
        };
        assert!(matches!(engine.monitor_state(*target_id).await.unwrap(), MonitorState::Misconfigured(_)));
    }

    #[tokio::test]
    async fn start_all_skips_misconfigured_and_inactive() {
        let (engine, db, _dir) = engine().await;
        let good = db.save_target(&Target::new("good", TargetKind::Group)).await.unwrap();
        let bad = db
            .save_target(&Target::new("bad", TargetKind::Http(HttpSettings::get("not a url"))))
            .await
            .unwrap();
        let mut idle = Target::new("idle", TargetKind::Group);
        idle.active = false;
        let idle = db.save_target(&idle).await.unwrap();

        assert_eq!(engine.start_all().await.unwrap(), 1);
        wait_for_beats(&engine, good, 1).await;
        assert!(matches!(engine.monitor_state(bad).await.unwrap(), MonitorState::Misconfigured(_)));
        assert_eq!(engine.monitor_state(idle).await.unwrap(), MonitorState::Stopped);
        assert_eq!(engine.stop_all().await, 1);
    }

    #[tokio::test]
    async fn pause_and_resume_persist_active_flag() {
        let (engine, db, _dir) = engine().await;
        let id = engine.save_target(&Target::new("group", TargetKind::Group)).await.unwrap();

        engine.pause(id).await.unwrap();
        assert!(!db.get_target(id).await.unwrap().unwrap().active);
        assert_eq!(engine.monitor_state(id).await.unwrap(), MonitorState::Stopped);

        engine.resume(id).await.unwrap();
        assert!(db.get_target(id).await.unwrap().unwrap().active);
        assert!(engine.scheduler.is_running(id).await);
        engine.stop_all().await;
    }

    #[tokio::test]
    async fn push_routes_by_token() {
        let (engine, _db, _dir) = engine().await;
        let settings = PushSettings::generate();
        let token = settings.token.clone();
        let id = engine.save_target(&Target::new("cron", TargetKind::Push(settings))).await.unwrap();

        assert!(matches!(engine.push("nope", PushSignal::up()).await, Err(EngineError::UnknownPushToken)));
        assert_eq!(engine.monitor_state(id).await.unwrap(), MonitorState::NoData);

        assert_eq!(engine.push(&token, PushSignal::down("disk full")).await.unwrap(), id);
        let beats = wait_for_beats(&engine, id, 1).await;
        assert_eq!(beats[0].message, "disk full");

        engine.pause(id).await.unwrap();
        assert!(matches!(engine.push(&token, PushSignal::up()).await, Err(EngineError::NotRunning(_))));
    }

    #[tokio::test]
    async fn maintenance_is_recorded_and_cleared() {
        let (engine, _db, _dir) = engine().await;
        let mut target = Target::new("group", TargetKind::Group);
        target.active = false;
        let id = engine.save_target(&target).await.unwrap();

        engine.set_maintenance(id, true);
        engine.start(id).await.unwrap();
        let beats = wait_for_beats(&engine, id, 1).await;
        assert_eq!(beats[0].status, MonitorStatus::Maintenance);
        assert_eq!(engine.get_uptime(id, chrono::Duration::hours(1)).await.unwrap(), Uptime::NoData);
        engine.stop(id).await;

        assert_eq!(engine.clear_important_markers(id).await.unwrap(), 1);
        assert!(engine.get_important_heartbeats(id).await.unwrap().is_empty());
        assert_eq!(engine.clear_heartbeats(id).await.unwrap(), 1);
        assert!(engine.get_heartbeats(id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_windows_reach_back_to_the_first_beat() {
        let (engine, _db, _dir) = engine().await;
        let id = engine.save_target(&Target::new("group", TargetKind::Group)).await.unwrap();
        wait_for_beats(&engine, id, 1).await;
        engine.stop(id).await;

        assert_eq!(engine.get_heartbeats(id, u32::MAX).await.unwrap().len(), 1);
        let uptime = engine.get_uptime(id, chrono::Duration::days(365 * 1_000_000)).await.unwrap();
        assert_eq!(uptime.ratio(), Some(1.0));
        assert_eq!(window_start(Utc::now(), chrono::Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn delete_stops_loop_and_removes_history() {
        let (engine, db, _dir) = engine().await;
        let id = engine.save_target(&Target::new("group", TargetKind::Group)).await.unwrap();
        wait_for_beats(&engine, id, 1).await;

        engine.delete_target(id).await.unwrap();
        assert!(!engine.scheduler.is_running(id).await);
        assert!(db.get_target(id).await.unwrap().is_none());
        assert!(engine.get_heartbeats(id, 1).await.unwrap().is_empty());
    }
}
