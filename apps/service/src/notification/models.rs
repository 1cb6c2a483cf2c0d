use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{MonitorStatus, TargetId};

/// Delivery parameters of a notification channel, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
        /// Override for the Bot API host, mostly for self-hosted gateways
        #[serde(default)]
        api_base: Option<String>,
    },
    Slack {
        webhook_url: String,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Slack { .. } => "slack",
        }
    }
}

/// What a notice is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    StatusChange,
    CertificateExpiry,
    Test,
}

/// Structured payload handed to every sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub target_id: Option<TargetId>,
    pub target_name: Option<String>,
    pub status: Option<MonitorStatus>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn status_change(
        target_id: TargetId,
        target_name: &str,
        status: MonitorStatus,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: NoticeKind::StatusChange,
            target_id: Some(target_id),
            target_name: Some(target_name.to_string()),
            status: Some(status),
            message: message.to_string(),
            timestamp,
        }
    }

    pub fn certificate_expiry(target_id: TargetId, target_name: &str, days: i64, subject: &str) -> Self {
        Self {
            kind: NoticeKind::CertificateExpiry,
            target_id: Some(target_id),
            target_name: Some(target_name.to_string()),
            status: None,
            message: format!("Certificate for {subject} will expire in {days} days"),
            timestamp: Utc::now(),
        }
    }

    pub fn test() -> Self {
        Self {
            kind: NoticeKind::Test,
            target_id: None,
            target_name: None,
            status: None,
            message: "Vigil test notification".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// One-line rendering for chat style channels
    pub fn headline(&self) -> String {
        match (self.kind, &self.target_name, self.status) {
            (NoticeKind::StatusChange, Some(name), Some(MonitorStatus::Up)) => {
                format!("[{name}] [✅ Up] {}", self.message)
            }
            (NoticeKind::StatusChange, Some(name), Some(status)) => {
                format!("[{name}] [🔴 {}] {}", status_label(status), self.message)
            }
            (NoticeKind::CertificateExpiry, Some(name), _) => format!("[{name}] {}", self.message),
            _ => self.message.clone(),
        }
    }
}

fn status_label(status: MonitorStatus) -> &'static str {
    match status {
        MonitorStatus::Up => "Up",
        MonitorStatus::Down => "Down",
        MonitorStatus::Pending => "Pending",
        MonitorStatus::Maintenance => "Maintenance",
    }
}
