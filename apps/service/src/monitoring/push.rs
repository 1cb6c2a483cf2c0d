use serde::Deserialize;

use super::types::{MonitorStatus, ProbeResult};

/// Inbound signal for a push target
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushSignal {
    #[serde(default = "default_status")]
    pub status: PushStatus,
    #[serde(default)]
    pub msg: Option<String>,
    /// Latency reported by the pusher, in milliseconds
    #[serde(default)]
    pub ping: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Up,
    Down,
}

fn default_status() -> PushStatus {
    PushStatus::Up
}

impl PushSignal {
    pub fn up() -> Self {
        Self { status: PushStatus::Up, msg: None, ping: None }
    }

    pub fn down(msg: impl Into<String>) -> Self {
        Self { status: PushStatus::Down, msg: Some(msg.into()), ping: None }
    }

    pub fn status(&self) -> MonitorStatus {
        match self.status {
            PushStatus::Up => MonitorStatus::Up,
            PushStatus::Down => MonitorStatus::Down,
        }
    }

    pub fn into_result(self) -> ProbeResult {
        let message = self.msg.filter(|m| !m.is_empty()).unwrap_or_else(|| "OK".to_string());
        match self.status {
            PushStatus::Up => ProbeResult { success: true, latency_ms: self.ping, message, certificate: None },
            PushStatus::Down => ProbeResult { success: false, latency_ms: self.ping, message, certificate: None },
        }
    }
}
