//! Up/down/pending state machine with retry budget.
//!
//! One `RetryContext` lives inside each running loop. It is seeded from the
//! latest persisted heartbeat and only advanced after a heartbeat was stored.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::MonitorStatus;
use crate::database::models::{Heartbeat, Target};

/// What the tick observed, after upside-down inversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Probe skipped because the target is in a maintenance window
    Maintenance,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success { Outcome::Success } else { Outcome::Failure }
    }
}

/// Result of evaluating an outcome against the current context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<MonitorStatus>,
    pub status: MonitorStatus,
    pub important: bool,
    pub retries: u32,
}

impl Transition {
    /// Whether bound channels should hear about this beat.
    ///
    /// The first beat never notifies. Entering DOWN and recovering from DOWN do;
    /// PENDING or MAINTENANCE returning to UP stay silent.
    pub fn is_notify_worthy(&self) -> bool {
        if !self.important || self.status == MonitorStatus::Maintenance {
            return false;
        }
        match (self.previous, self.status) {
            (None, _) => false,
            (Some(prev), MonitorStatus::Down) => prev != MonitorStatus::Down,
            (Some(MonitorStatus::Down), MonitorStatus::Up) => true,
            _ => false,
        }
    }
}

/// Per-loop retry state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    pub previous: Option<MonitorStatus>,
    pub retries: u32,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl RetryContext {
    /// Seed from the most recent persisted heartbeat, if any
    pub fn from_latest(latest: Option<&Heartbeat>) -> Self {
        match latest {
            Some(beat) => Self {
                previous: Some(beat.status),
                retries: beat.retries,
                last_timestamp: Some(beat.timestamp),
            },
            None => Self::default(),
        }
    }

    pub fn evaluate(&self, outcome: Outcome, max_retries: u32) -> Transition {
        let first = self.previous.is_none();

        let (status, retries, important) = match outcome {
            Outcome::Success => {
                (MonitorStatus::Up, 0, first || self.previous != Some(MonitorStatus::Up))
            }
            Outcome::Maintenance => (
                MonitorStatus::Maintenance,
                0,
                first || self.previous != Some(MonitorStatus::Maintenance),
            ),
            Outcome::Failure => {
                let retries = self.retries.saturating_add(1);
                if retries <= max_retries {
                    (MonitorStatus::Pending, retries, first)
                } else {
                    (MonitorStatus::Down, retries, first || self.previous != Some(MonitorStatus::Down))
                }
            }
        };

        Transition { previous: self.previous, status, important, retries }
    }

    /// Timestamp for the next beat; never earlier than the last one recorded
    pub fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Advance after the beat was persisted
    pub fn commit(&mut self, transition: &Transition, timestamp: DateTime<Utc>) {
        self.previous = Some(transition.status);
        self.retries = transition.retries;
        self.last_timestamp = Some(timestamp);
    }

    /// Wait before the next tick
    pub fn next_wait(&self, target: &Target) -> Duration {
        match self.previous {
            Some(MonitorStatus::Pending) => target.retry_interval(),
            _ => target.interval(),
        }
    }
}
