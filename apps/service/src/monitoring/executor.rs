use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use super::checker::Checker;
use super::push::PushSignal;
use super::state::{Outcome, RetryContext, Transition};
use super::tls::expiry_warning;
use super::types::{CertificateInfo, ProbeResult, TargetId};
use crate::database::models::{Heartbeat, Target};
use crate::database::{HeartbeatStore, TargetRepository};
use crate::events::EventBus;
use crate::notification::Dispatcher;
use crate::notification::models::Notice;

const MAINTENANCE_MESSAGE: &str = "Under maintenance";

fn maintenance_result() -> ProbeResult {
    ProbeResult { success: true, latency_ms: None, message: MAINTENANCE_MESSAGE.to_string(), certificate: None }
}

/// Targets currently inside a maintenance window
#[derive(Debug, Default)]
pub struct MaintenanceSet {
    ids: RwLock<HashSet<TargetId>>,
}

impl MaintenanceSet {
    pub fn set(&self, id: TargetId, enabled: bool) {
        let mut ids = self.ids.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if enabled {
            ids.insert(id);
        } else {
            ids.remove(&id);
        }
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.ids.read().unwrap_or_else(|poisoned| poisoned.into_inner()).contains(&id)
    }
}

/// Collaborators shared by every running loop
pub struct LoopServices {
    pub targets: Arc<dyn TargetRepository>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: EventBus,
    pub maintenance: MaintenanceSet,
    /// Extra slack before a silent push target is failed
    pub push_grace: Duration,
}

/// One target's timed loop: probe, evaluate, persist, publish, notify
pub struct MonitorLoop {
    target: Target,
    checker: Arc<dyn Checker>,
    ctx: RetryContext,
    services: Arc<LoopServices>,
}

impl MonitorLoop {
    pub fn new(target: Target, checker: Arc<dyn Checker>, ctx: RetryContext, services: Arc<LoopServices>) -> Self {
        Self { target, checker, ctx, services }
    }

    /// Drive the loop until `shutdown` fires (or its sender is dropped)
    pub async fn run(
        self,
        first_delay: Duration,
        shutdown: oneshot::Receiver<()>,
        push_rx: Option<mpsc::Receiver<PushSignal>>,
    ) {
        let target_id = self.target.id;
        info!(target_id, name = %self.target.name, kind = self.target.kind.name(), "Monitor loop started");

        match push_rx {
            Some(push_rx) => self.run_push(first_delay, shutdown, push_rx).await,
            None => self.run_active(first_delay, shutdown).await,
        }

        info!(target_id, "Monitor loop stopped");
    }

    async fn run_active(mut self, first_delay: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut wait = first_delay;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                _ = sleep(wait) => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                _ = self.tick() => {}
            }

            wait = self.ctx.next_wait(&self.target);
        }
    }

    async fn run_push(
        mut self,
        first_delay: Duration,
        mut shutdown: oneshot::Receiver<()>,
        mut push_rx: mpsc::Receiver<PushSignal>,
    ) {
        let grace = self.services.push_grace;
        let mut deadline = Instant::now() + first_delay + self.target.interval() + grace;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                Some(signal) = push_rx.recv() => {
                    debug!(target_id = self.target.id, "Push signal received");
                    if self.services.maintenance.contains(self.target.id) {
                        self.record(Outcome::Maintenance, maintenance_result()).await;
                    } else {
                        let result = self.apply_upside_down(signal.into_result());
                        self.record(Outcome::from_success(result.success), result).await;
                    }
                    deadline = Instant::now() + self.target.interval() + grace;
                }
                _ = sleep_until(deadline) => {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => return,
                        _ = self.tick() => {}
                    }
                    deadline = Instant::now() + self.ctx.next_wait(&self.target);
                }
            }
        }
    }

    /// Probe once (or skip for maintenance) and record the outcome
    async fn tick(&mut self) {
        if self.services.maintenance.contains(self.target.id) {
            self.record(Outcome::Maintenance, maintenance_result()).await;
            return;
        }

        let limit = self.target.timeout();
        let result = match timeout(limit, self.checker.check()).await {
            Ok(result) => result,
            Err(_) => ProbeResult::down(format!("Timeout after {}s", limit.as_secs())),
        };

        let result = self.apply_upside_down(result);
        self.record(Outcome::from_success(result.success), result).await;
    }

    fn apply_upside_down(&self, result: ProbeResult) -> ProbeResult {
        if self.target.upside_down { result.inverted() } else { result }
    }

    async fn record(&mut self, outcome: Outcome, result: ProbeResult) {
        let target_id = self.target.id;
        let timestamp = self.ctx.stamp(Utc::now());
        let transition = self.ctx.evaluate(outcome, self.target.max_retries);

        let mut heartbeat = Heartbeat {
            id: None,
            target_id,
            timestamp,
            status: transition.status,
            response_time_ms: result.latency_ms,
            message: result.message,
            important: transition.important,
            retries: transition.retries,
        };

        match self.services.heartbeats.append(&heartbeat).await {
            Ok(id) => heartbeat.id = Some(id),
            Err(e) => {
                error!(target_id, "Failed to store heartbeat, skipping tick: {:#}", e);
                return;
            }
        }
        self.ctx.commit(&transition, timestamp);

        debug!(
            target_id,
            status = %heartbeat.status,
            important = heartbeat.important,
            retries = heartbeat.retries,
            "Heartbeat recorded"
        );
        self.services.events.publish_heartbeat(&heartbeat);

        if transition.is_notify_worthy() {
            self.notify_transition(&transition, &heartbeat);
        }

        if let Some(certificate) = result.certificate {
            self.handle_certificate(certificate).await;
        }
    }

    fn notify_transition(&self, transition: &Transition, heartbeat: &Heartbeat) {
        info!(
            target_id = self.target.id,
            from = ?transition.previous,
            to = %transition.status,
            "Status changed, notifying channels"
        );
        let notice =
            Notice::status_change(self.target.id, &self.target.name, heartbeat.status, &heartbeat.message, heartbeat.timestamp);
        self.spawn_dispatch(notice);
    }

    /// Deliveries run off the loop so a slow channel never delays the next tick
    fn spawn_dispatch(&self, notice: Notice) {
        let services = Arc::clone(&self.services);
        let target_id = self.target.id;
        tokio::spawn(async move {
            match services.targets.get_channels_for_target(target_id).await {
                Ok(channels) if channels.is_empty() => {}
                Ok(channels) => {
                    services.dispatcher.dispatch(&channels, &notice).await;
                }
                Err(e) => warn!(target_id, "Failed to load notification channels: {:#}", e),
            }
        });
    }

    async fn handle_certificate(&self, certificate: CertificateInfo) {
        let target_id = self.target.id;
        if let Err(e) = self.services.heartbeats.save_tls_info(target_id, &certificate).await {
            warn!(target_id, "Failed to store TLS info: {:#}", e);
        }

        let Some(threshold) = self.target.cert_expiry_warning_days else {
            return;
        };
        let Some(days) = expiry_warning(&certificate, threshold, Utc::now()) else {
            return;
        };

        let heartbeats = &self.services.heartbeats;
        match heartbeats.certificate_warning_sent(target_id, &certificate.fingerprint_sha256).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) =
                    heartbeats.record_certificate_warning(target_id, &certificate.fingerprint_sha256, days).await
                {
                    warn!(target_id, "Failed to record certificate warning: {:#}", e);
                    return;
                }
                info!(target_id, days, subject = %certificate.subject, "Certificate expiring soon");
                self.spawn_dispatch(Notice::certificate_expiry(
                    target_id,
                    &self.target.name,
                    days,
                    &certificate.subject,
                ));
            }
            Err(e) => warn!(target_id, "Failed to look up certificate warning: {:#}", e),
        }
    }
}
