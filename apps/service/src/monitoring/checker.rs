use std::sync::Arc;

use async_trait::async_trait;

use super::dns::DnsChecker;
use super::group::GroupChecker;
use super::http::HttpChecker;
use super::mqtt::MqttChecker;
use super::sql::SqlChecker;
use super::tcp::TcpChecker;
use super::types::ProbeResult;
use super::validation::validate_target;
use crate::database::models::{Target, TargetKind};
use crate::database::{HeartbeatStore, TargetRepository};
use crate::error::EngineError;

/// Message recorded when a push target's deadline passes without a signal
pub const PUSH_TIMEOUT_MESSAGE: &str = "No heartbeat in the time window";

/// Checker trait for the different kinds of monitoring checks.
///
/// A failing endpoint is a `success: false` result; there is no error path.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self) -> ProbeResult;
}

/// Closed set of probes, one per target kind
pub enum Probe {
    Http(HttpChecker),
    Tcp(TcpChecker),
    Dns(DnsChecker),
    Mqtt(MqttChecker),
    Database(SqlChecker),
    /// Passive; only reached when the loop's deadline expires
    Push,
    Group(GroupChecker),
}

#[async_trait]
impl Checker for Probe {
    async fn check(&self) -> ProbeResult {
        match self {
            Probe::Http(checker) => checker.check().await,
            Probe::Tcp(checker) => checker.check().await,
            Probe::Dns(checker) => checker.check().await,
            Probe::Mqtt(checker) => checker.check().await,
            Probe::Database(checker) => checker.check().await,
            Probe::Push => ProbeResult::down(PUSH_TIMEOUT_MESSAGE),
            Probe::Group(checker) => checker.check().await,
        }
    }
}

/// Turns a target definition into a ready checker.
///
/// Configuration problems surface here so a loop never starts misconfigured.
#[async_trait]
pub trait CheckerFactory: Send + Sync {
    async fn prepare(&self, target: &Target) -> Result<Arc<dyn Checker>, EngineError>;
}

/// Builds the protocol probes, resolving proxies through the repository
pub struct ProbeFactory {
    targets: Arc<dyn TargetRepository>,
    heartbeats: Arc<dyn HeartbeatStore>,
}

impl ProbeFactory {
    pub fn new(targets: Arc<dyn TargetRepository>, heartbeats: Arc<dyn HeartbeatStore>) -> Self {
        Self { targets, heartbeats }
    }

    pub async fn build(&self, target: &Target) -> Result<Probe, EngineError> {
        let invalid = |reason: String| EngineError::invalid_config(target.id, reason);

        validate_target(target).map_err(|e| invalid(e.to_string()))?;
        let timeout = target.timeout();

        let probe = match &target.kind {
            TargetKind::Http(settings) => {
                let proxy = match target.proxy_id {
                    Some(proxy_id) => Some(
                        self.targets
                            .get_proxy(proxy_id)
                            .await?
                            .ok_or_else(|| invalid(format!("proxy {proxy_id} does not exist")))?,
                    ),
                    None => None,
                };
                Probe::Http(HttpChecker::new(settings, proxy.as_ref(), timeout).map_err(invalid)?)
            }
            TargetKind::Tcp(settings) => Probe::Tcp(TcpChecker::new(settings, timeout)),
            TargetKind::Dns(settings) => Probe::Dns(DnsChecker::new(settings, timeout).map_err(invalid)?),
            TargetKind::Mqtt(settings) => Probe::Mqtt(MqttChecker::new(settings, timeout).map_err(invalid)?),
            TargetKind::Database(settings) => {
                Probe::Database(SqlChecker::new(settings, timeout).map_err(invalid)?)
            }
            TargetKind::Push(_) => Probe::Push,
            TargetKind::Group => Probe::Group(GroupChecker::new(
                target.id,
                Arc::clone(&self.targets),
                Arc::clone(&self.heartbeats),
            )),
        };
        Ok(probe)
    }
}

#[async_trait]
impl CheckerFactory for ProbeFactory {
    async fn prepare(&self, target: &Target) -> Result<Arc<dyn Checker>, EngineError> {
        Ok(Arc::new(self.build(target).await?))
    }
}
