/// Monitoring engine module - probes targets and runs their loops
///
/// This module is responsible for:
/// - Executing HTTP/TCP/DNS/MQTT/database/push/group checks
/// - Turning results into UP/DOWN/PENDING/MAINTENANCE heartbeats
/// - Scheduling one loop per active target
pub mod checker;
pub mod dns;
pub mod executor;
pub mod group;
pub mod http;
pub mod mqtt;
pub mod ntlm;
pub mod push;
pub mod scheduler;
pub mod sql;
pub mod state;
pub mod status_codes;
pub mod tcp;
pub mod tls;
pub mod types;
pub mod validation;

pub use checker::{Checker, CheckerFactory, ProbeFactory};
pub use scheduler::{LoopState, MonitoringScheduler};
pub use types::{MonitorStatus, ProbeResult, TargetId};
