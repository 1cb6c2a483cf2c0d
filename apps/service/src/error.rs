use thiserror::Error;

use crate::monitoring::types::TargetId;

/// Errors surfaced by the engine's lifecycle and query operations.
///
/// Probe failures never show up here; they become DOWN or PENDING heartbeats.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("target {0} already has a running loop")]
    AlreadyRunning(TargetId),

    #[error("target {0} not found")]
    TargetNotFound(TargetId),

    #[error("invalid configuration for target {target_id}: {reason}")]
    InvalidConfig { target_id: TargetId, reason: String },

    #[error("target {0} has no running loop")]
    NotRunning(TargetId),

    #[error("unknown push token")]
    UnknownPushToken,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_config(target_id: TargetId, reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig { target_id, reason: reason.into() }
    }
}
