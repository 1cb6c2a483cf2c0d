use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database identifier of a monitored target
pub type TargetId = i64;

/// Status recorded on a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Down,
    Up,
    Pending,
    Maintenance,
}

impl MonitorStatus {
    /// Integer code used in the `heartbeats.status` column
    pub fn code(self) -> i64 {
        match self {
            MonitorStatus::Down => 0,
            MonitorStatus::Up => 1,
            MonitorStatus::Pending => 2,
            MonitorStatus::Maintenance => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MonitorStatus::Down),
            1 => Some(MonitorStatus::Up),
            2 => Some(MonitorStatus::Pending),
            3 => Some(MonitorStatus::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            "pending" => Ok(MonitorStatus::Pending),
            "maintenance" => Ok(MonitorStatus::Maintenance),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// Leaf certificate presented by a TLS endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Hex-encoded SHA-256 over the DER bytes
    pub fingerprint_sha256: String,
}

impl CertificateInfo {
    /// Whole days until expiry, negative once expired
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

/// Outcome of a single probe. Produced fresh each tick, never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub success: bool,

    /// Response time in milliseconds
    pub latency_ms: Option<u64>,

    /// Human readable description of what happened
    pub message: String,

    /// TLS certificate seen during the probe, regardless of pass/fail
    pub certificate: Option<CertificateInfo>,
}

impl ProbeResult {
    /// Mark the probe as successful
    pub fn up(latency_ms: u64, message: impl Into<String>) -> Self {
        Self { success: true, latency_ms: Some(latency_ms), message: message.into(), certificate: None }
    }

    /// Mark the probe as failed
    pub fn down(message: impl Into<String>) -> Self {
        Self { success: false, latency_ms: None, message: message.into(), certificate: None }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_certificate(mut self, certificate: Option<CertificateInfo>) -> Self {
        self.certificate = certificate;
        self
    }

    /// Flip pass/fail for upside-down targets
    pub fn inverted(mut self) -> Self {
        if self.success {
            self.success = false;
            self.message = format!("Flip UP to DOWN: {}", self.message);
        } else {
            self.success = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            MonitorStatus::Down,
            MonitorStatus::Up,
            MonitorStatus::Pending,
            MonitorStatus::Maintenance,
        ] {
            assert_eq!(MonitorStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(MonitorStatus::from_code(9), None);
    }

    #[test]
    fn inverted_flips_success() {
        let up = ProbeResult::up(12, "200 - OK").inverted();
        assert!(!up.success);
        assert!(up.message.contains("200 - OK"));
        assert_eq!(up.latency_ms, Some(12));

        let down = ProbeResult::down("connection refused").inverted();
        assert!(down.success);
        assert_eq!(down.message, "connection refused");
    }
}
