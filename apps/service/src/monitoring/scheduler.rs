use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::checker::CheckerFactory;
use super::executor::{LoopServices, MonitorLoop};
use super::push::PushSignal;
use super::state::RetryContext;
use super::types::TargetId;
use crate::database::models::Target;
use crate::error::EngineError;

/// Buffered push signals per target
const PUSH_BUFFER: usize = 16;

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    push_tx: Option<mpsc::Sender<PushSignal>>,
    started_at: DateTime<Utc>,
}

enum Slot {
    Idle,
    Running(RunningLoop),
    /// Last start attempt was rejected by configuration checks
    Failed(String),
}

/// Registry view of one target's loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running { started_at: DateTime<Utc> },
    Misconfigured(String),
    Stopped,
}

/// Monitoring scheduler - owns at most one running loop per target
pub struct MonitoringScheduler {
    factory: Arc<dyn CheckerFactory>,
    services: Arc<LoopServices>,
    slots: StdMutex<HashMap<TargetId, Arc<Mutex<Slot>>>>,
    stop_timeout: Duration,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(factory: Arc<dyn CheckerFactory>, services: Arc<LoopServices>, stop_timeout: Duration) -> Self {
        Self { factory, services, slots: StdMutex::new(HashMap::new()), stop_timeout }
    }

    fn slot(&self, id: TargetId) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(id).or_insert_with(|| Arc::new(Mutex::new(Slot::Idle))))
    }

    fn existing_slot(&self, id: TargetId) -> Option<Arc<Mutex<Slot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(&id).cloned()
    }

    /// Lock the slot currently registered for `id`.
    ///
    /// `forget` may unregister a slot while we wait for its lock; such a slot is
    /// dropped and we retry on the fresh one.
    async fn lock_registered(&self, id: TargetId) -> OwnedMutexGuard<Slot> {
        loop {
            let slot = self.slot(id);
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.existing_slot(id).is_some_and(|current| Arc::ptr_eq(&current, &slot)) {
                return guard;
            }
        }
    }

    /// Start a loop whose first tick fires after `first_delay`
    pub async fn start(&self, target: Target, first_delay: Duration) -> Result<(), EngineError> {
        let target_id = target.id;
        let mut guard = self.lock_registered(target_id).await;

        if let Slot::Running(running) = &*guard {
            if !running.handle.is_finished() {
                return Err(EngineError::AlreadyRunning(target_id));
            }
        }

        let checker = match self.factory.prepare(&target).await {
            Ok(checker) => checker,
            Err(EngineError::InvalidConfig { target_id, reason }) => {
                warn!(target_id, "Refusing to start misconfigured target: {}", reason);
                *guard = Slot::Failed(reason.clone());
                return Err(EngineError::InvalidConfig { target_id, reason });
            }
            Err(e) => return Err(e),
        };

        let latest = self.services.heartbeats.latest(target_id).await?;
        let ctx = RetryContext::from_latest(latest.as_ref());

        let (shutdown, shutdown_rx) = oneshot::channel();
        let (push_tx, push_rx) = if target.is_push() {
            let (tx, rx) = mpsc::channel(PUSH_BUFFER);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let monitor = MonitorLoop::new(target, checker, ctx, Arc::clone(&self.services));
        let handle = tokio::spawn(monitor.run(first_delay, shutdown_rx, push_rx));

        debug!(target_id, delay_ms = first_delay.as_millis() as u64, "Scheduled monitor loop");
        *guard = Slot::Running(RunningLoop { shutdown, handle, push_tx, started_at: Utc::now() });
        Ok(())
    }

    /// Cancel a loop and wait until it has exited. Returns whether one was running.
    pub async fn stop(&self, id: TargetId) -> bool {
        let Some(slot) = self.existing_slot(id) else {
            return false;
        };
        let mut guard = slot.lock().await;

        let Slot::Running(running) = std::mem::replace(&mut *guard, Slot::Idle) else {
            return false;
        };
        self.shutdown(id, running).await;
        true
    }

    async fn shutdown(&self, id: TargetId, running: RunningLoop) {
        let RunningLoop { shutdown, mut handle, .. } = running;
        let _ = shutdown.send(());
        if tokio::time::timeout(self.stop_timeout, &mut handle).await.is_err() {
            warn!(target_id = id, "Monitor loop did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
        info!(target_id = id, "Monitor stopped");
    }

    /// Stop every running loop concurrently
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<TargetId> =
            self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).keys().copied().collect();
        join_all(ids.into_iter().map(|id| self.stop(id))).await.into_iter().filter(|stopped| *stopped).count()
    }

    /// Hand a push signal to a running push loop
    pub async fn push(&self, id: TargetId, signal: PushSignal) -> Result<(), EngineError> {
        let push_tx = match self.existing_slot(id) {
            Some(slot) => match &*slot.lock().await {
                Slot::Running(RunningLoop { push_tx: Some(tx), .. }) => Some(tx.clone()),
                _ => None,
            },
            None => None,
        };

        let push_tx = push_tx.ok_or(EngineError::NotRunning(id))?;
        push_tx.send(signal).await.map_err(|_| EngineError::NotRunning(id))
    }

    pub async fn state(&self, id: TargetId) -> LoopState {
        let Some(slot) = self.existing_slot(id) else {
            return LoopState::Stopped;
        };
        match &*slot.lock().await {
            Slot::Running(running) if !running.handle.is_finished() => {
                LoopState::Running { started_at: running.started_at }
            }
            Slot::Failed(reason) => LoopState::Misconfigured(reason.clone()),
            _ => LoopState::Stopped,
        }
    }

    pub async fn is_running(&self, id: TargetId) -> bool {
        matches!(self.state(id).await, LoopState::Running { .. })
    }

    /// Stop the loop and drop the slot once the target is gone
    pub async fn forget(&self, id: TargetId) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        let mut guard = slot.lock().await;
        if let Slot::Running(running) = std::mem::replace(&mut *guard, Slot::Idle) {
            self.shutdown(id, running).await;
        }

        // unregister while still holding the slot so a waiting `start` sees it is gone
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots.get(&id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            slots.remove(&id);
        }
        drop(slots);
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Heartbeat, PushSettings, TargetKind};
    use crate::database::{DatabaseImpl, HeartbeatStore, TargetRepository};
    use crate::events::EventBus;
    use crate::monitoring::checker::Checker;
    use crate::monitoring::executor::MaintenanceSet;
    use crate::monitoring::types::{MonitorStatus, ProbeResult};
    use crate::database::models::NotificationChannel;
    use crate::notification::Dispatcher;
    use crate::notification::models::ChannelConfig;
    use crate::test_support::{test_database, webhook_endpoint};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back a fixed list of results, then repeats the last one
    struct Scripted {
        results: StdMutex<VecDeque<bool>>,
        last: StdMutex<bool>,
        in_flight: Arc<AtomicUsize>,
        hang: bool,
    }

    #[async_trait]
    impl Checker for Scripted {
        async fn check(&self) -> ProbeResult {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.results.lock().unwrap().pop_front();
            let success = match next {
                Some(success) => {
                    *self.last.lock().unwrap() = success;
                    success
                }
                None => *self.last.lock().unwrap(),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if success { ProbeResult::up(1, "ok") } else { ProbeResult::down("fail") }
        }
    }

    struct ScriptedFactory {
        script: Vec<bool>,
        in_flight: Arc<AtomicUsize>,
        hang: bool,
    }

    #[async_trait]
    impl CheckerFactory for ScriptedFactory {
        async fn prepare(&self, target: &Target) -> Result<Arc<dyn Checker>, EngineError> {
            if target.name == "broken" {
                return Err(EngineError::invalid_config(target.id, "broken on purpose"));
            }
            if target.is_push() {
                return Ok(Arc::new(crate::monitoring::checker::Probe::Push));
            }
            Ok(Arc::new(Scripted {
                results: StdMutex::new(self.script.iter().copied().collect()),
                last: StdMutex::new(true),
                in_flight: Arc::clone(&self.in_flight),
                hang: self.hang,
            }))
        }
    }

    struct Harness {
        scheduler: MonitoringScheduler,
        db: Arc<DatabaseImpl>,
        in_flight: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    async fn harness(script: Vec<bool>, hang: bool) -> Harness {
        let (db, dir) = test_database().await.unwrap();
        let services = Arc::new(LoopServices {
            targets: db.clone(),
            heartbeats: db.clone(),
            dispatcher: Arc::new(Dispatcher::new(Duration::from_secs(1))),
            events: EventBus::new(64),
            maintenance: MaintenanceSet::default(),
            push_grace: Duration::from_secs(10),
        });
        let in_flight = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(ScriptedFactory { script, in_flight: Arc::clone(&in_flight), hang });
        Harness {
            scheduler: MonitoringScheduler::new(factory, services, Duration::from_secs(5)),
            db,
            in_flight,
            _dir: dir,
        }
    }

    async fn saved(db: &DatabaseImpl, mut target: Target) -> Target {
        target.id = db.save_target(&target).await.unwrap();
        target
    }

    async fn history(db: &DatabaseImpl, id: TargetId) -> Vec<Heartbeat> {
        db.query_range(id, Utc::now() - chrono::Duration::days(1)).await.unwrap()
    }

    /// Let spawned loops run their pending work
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_down_up_scenario() {
        let h = harness(vec![false, false, false, true], false).await;
        let mut target = Target::new("api", TargetKind::Group);
        target.max_retries = 2;
        target.interval_secs = 60;
        target.retry_interval_secs = 5;
        let target = saved(&h.db, target).await;

        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        // ticks at t=0, 5, 10 and 70
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            settle().await;
        }
        h.scheduler.stop(target.id).await;

        let beats = history(&h.db, target.id).await;
        let observed: Vec<_> = beats.iter().take(4).map(|b| (b.status, b.important)).collect();
        assert_eq!(observed, vec![
            (MonitorStatus::Pending, true),
            (MonitorStatus::Pending, false),
            (MonitorStatus::Down, true),
            (MonitorStatus::Up, true),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_rejected() {
        let h = harness(vec![], false).await;
        let target = saved(&h.db, Target::new("api", TargetKind::Group)).await;

        h.scheduler.start(target.clone(), Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            h.scheduler.start(target.clone(), Duration::ZERO).await,
            Err(EngineError::AlreadyRunning(id)) if id == target.id
        ));

        assert!(h.scheduler.stop(target.id).await);
        assert!(!h.scheduler.stop(target.id).await, "stop is idempotent");
        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        assert!(h.scheduler.is_running(target.id).await);
        assert_eq!(h.scheduler.stop_all().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_in_flight_probe_and_no_write_follows() {
        let h = harness(vec![], true).await;
        let mut target = Target::new("slow", TargetKind::Group);
        target.interval_secs = 600;
        target.timeout_secs = Some(300);
        let target = saved(&h.db, target).await;

        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.in_flight.load(Ordering::SeqCst), 1);

        h.scheduler.stop(target.id).await;
        tokio::time::sleep(Duration::from_secs(900)).await;
        settle().await;
        assert!(history(&h.db, target.id).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn misconfigured_target_is_remembered() {
        let h = harness(vec![], false).await;
        let target = saved(&h.db, Target::new("broken", TargetKind::Group)).await;

        let err = h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
        assert_eq!(h.scheduler.state(target.id).await, LoopState::Misconfigured("broken on purpose".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_push_target_goes_down_at_deadline() {
        let h = harness(vec![], false).await;
        let mut target = Target::new("cron", TargetKind::Push(PushSettings::generate()));
        target.interval_secs = 60;
        let target = saved(&h.db, target).await;

        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        h.scheduler.push(target.id, PushSignal::up()).await.unwrap();
        settle().await;

        // no signal for the next 90 seconds
        tokio::time::sleep(Duration::from_secs(90)).await;
        settle().await;
        h.scheduler.stop(target.id).await;

        let beats = history(&h.db, target.id).await;
        assert_eq!(beats.first().map(|b| b.status), Some(MonitorStatus::Up));
        let last = beats.last().unwrap();
        assert_eq!(last.status, MonitorStatus::Down);
        assert!(last.important);
        assert_eq!(last.message, crate::monitoring::checker::PUSH_TIMEOUT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_skips_probe() {
        let h = harness(vec![false], false).await;
        let target = saved(&h.db, Target::new("api", TargetKind::Group)).await;
        h.scheduler.services.maintenance.set(target.id, true);

        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        h.scheduler.stop(target.id).await;

        let beats = history(&h.db, target.id).await;
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].status, MonitorStatus::Maintenance);
        assert!(beats[0].important);
    }

    #[tokio::test]
    async fn start_racing_forget_leaves_a_live_loop() {
        let h = harness(vec![], false).await;
        let target = saved(&h.db, Target::new("api", TargetKind::Group)).await;
        h.scheduler.start(target.clone(), Duration::from_secs(60)).await.unwrap();

        let (_, started) =
            tokio::join!(h.scheduler.forget(target.id), h.scheduler.start(target.clone(), Duration::from_secs(60)));
        started.unwrap();
        assert!(h.scheduler.is_running(target.id).await);
        assert_eq!(h.scheduler.stop_all().await, 1);
    }

    #[tokio::test]
    async fn forget_unknown_target_is_a_no_op() {
        let h = harness(vec![], false).await;
        h.scheduler.forget(42).await;
        assert_eq!(h.scheduler.state(42).await, LoopState::Stopped);
    }

    // real clock: the webhook round trip runs on local sockets
    #[tokio::test]
    async fn transitions_notify_bound_channels_once_each() {
        let h = harness(vec![true, false, false, false, true], false).await;
        let mut target = Target::new("api", TargetKind::Group);
        target.max_retries = 1;
        target.interval_secs = 1;
        target.retry_interval_secs = 1;
        let target = saved(&h.db, target).await;

        let (url, mut deliveries) = webhook_endpoint("200 OK").await;
        let channel = NotificationChannel {
            id: 0,
            name: "ops".into(),
            config: ChannelConfig::Webhook { url, method: "POST".into(), headers: None },
        };
        let channel_id = h.db.save_channel(&channel).await.unwrap();
        h.db.set_target_channels(target.id, &[channel_id]).await.unwrap();

        // up, pending, down, down, up
        h.scheduler.start(target.clone(), Duration::ZERO).await.unwrap();
        let mut bodies = Vec::new();
        for _ in 0..2 {
            let body = tokio::time::timeout(Duration::from_secs(10), deliveries.recv()).await.unwrap().unwrap();
            bodies.push(body);
        }
        assert!(bodies[0].contains("\"status\":\"down\""), "{}", bodies[0]);
        assert!(bodies[1].contains("\"status\":\"up\""), "{}", bodies[1]);

        h.scheduler.services.maintenance.set(target.id, true);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.scheduler.stop(target.id).await;

        assert!(deliveries.try_recv().is_err(), "no delivery expected during maintenance");
        let beats = history(&h.db, target.id).await;
        let statuses: Vec<_> = beats.iter().map(|b| b.status).collect();
        assert_eq!(&statuses[..5], &[
            MonitorStatus::Up,
            MonitorStatus::Pending,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Up,
        ]);
        assert_eq!(beats.last().map(|b| b.status), Some(MonitorStatus::Maintenance));
    }
}
