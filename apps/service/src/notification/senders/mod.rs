use async_trait::async_trait;
use thiserror::Error;

use super::models::{ChannelConfig, Notice};

pub mod slack;
pub mod telegram;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Delivery timed out")]
    Timeout,
}

/// A trait for sending notifications to a specific channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, config: &ChannelConfig, notice: &Notice) -> Result<(), SenderError>;
}

/// Turn a non-2xx answer into a `SendFailed` carrying the body
pub(crate) async fn ensure_success(response: reqwest::Response, what: &str) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!("{what} returned non-success status: {status}. Body: {error_body}")))
}
