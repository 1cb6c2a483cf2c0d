//! Rolling-window availability computed from the heartbeat history.
//!
//! Each heartbeat's status holds until the next heartbeat (or `now`). The
//! heartbeat preceding the window covers its leading edge. MAINTENANCE time is
//! left out of both numerator and denominator; PENDING and DOWN count as down.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::models::Heartbeat;
use crate::monitoring::types::{CertificateInfo, MonitorStatus, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Uptime {
    /// No heartbeat inside the window
    NoData,
    /// Fraction of covered time spent UP, in `0.0..=1.0`
    Ratio(f64),
}

impl Uptime {
    pub fn ratio(self) -> Option<f64> {
        match self {
            Uptime::NoData => None,
            Uptime::Ratio(ratio) => Some(ratio),
        }
    }
}

/// `beats` must be the heartbeats inside `[window_start, now]`, oldest first
pub fn compute(
    before: Option<&Heartbeat>,
    beats: &[Heartbeat],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Uptime {
    if beats.is_empty() {
        return Uptime::NoData;
    }

    let mut segments: Vec<(DateTime<Utc>, MonitorStatus)> = Vec::with_capacity(beats.len() + 1);
    if let Some(before) = before {
        segments.push((window_start, before.status));
    }
    segments.extend(beats.iter().map(|b| (b.timestamp.max(window_start), b.status)));

    let mut up_ms: i64 = 0;
    let mut down_ms: i64 = 0;
    for (i, (start, status)) in segments.iter().enumerate() {
        let end = segments.get(i + 1).map(|(next, _)| *next).unwrap_or(now).min(now);
        let span = (end - *start).num_milliseconds().max(0);
        match status {
            MonitorStatus::Up => up_ms += span,
            MonitorStatus::Down | MonitorStatus::Pending => down_ms += span,
            MonitorStatus::Maintenance => {}
        }
    }

    let total = up_ms + down_ms;
    if total > 0 {
        return Uptime::Ratio(up_ms as f64 / total as f64);
    }

    // Everything landed on one instant; fall back to counting beats
    let counted: Vec<_> = beats.iter().filter(|b| b.status != MonitorStatus::Maintenance).collect();
    if counted.is_empty() {
        return Uptime::NoData;
    }
    let up = counted.iter().filter(|b| b.status == MonitorStatus::Up).count();
    Uptime::Ratio(up as f64 / counted.len() as f64)
}

/// Mean response time over the beats that carried one
pub fn average_response_ms(beats: &[Heartbeat]) -> Option<f64> {
    let samples: Vec<u64> = beats.iter().filter_map(|b| b.response_time_ms).collect();
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
}

/// Current status and headline numbers for one target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSummary {
    pub target_id: TargetId,
    pub status: Option<MonitorStatus>,
    pub last_heartbeat: Option<Heartbeat>,
    pub uptime_24h: Uptime,
    pub uptime_30d: Uptime,
    pub avg_response_ms_24h: Option<f64>,
    pub certificate: Option<CertificateInfo>,
}
