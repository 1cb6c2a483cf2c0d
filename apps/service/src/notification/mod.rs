//! Best-effort delivery of notices to the channels bound to a target.
//!
//! Every channel is attempted independently and concurrently; a failing
//! channel is logged and never affects the others. There is no retry queue.

pub mod models;
pub mod senders;

use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};

use self::models::{ChannelConfig, Notice};
use self::senders::slack::SlackSender;
use self::senders::telegram::TelegramSender;
use self::senders::webhook::WebhookSender;
use self::senders::{NotificationSender, SenderError};
use crate::database::models::NotificationChannel;

/// Per-channel delivery result
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub channel_id: i64,
    pub channel_name: String,
    pub result: Result<(), SenderError>,
}

pub struct Dispatcher {
    timeout: Duration,
    webhook: WebhookSender,
    telegram: TelegramSender,
    slack: SlackSender,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("Vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            timeout,
            webhook: WebhookSender::new(client.clone()),
            telegram: TelegramSender::new(client.clone()),
            slack: SlackSender::new(client),
        }
    }

    fn sender_for(&self, config: &ChannelConfig) -> &dyn NotificationSender {
        match config {
            ChannelConfig::Webhook { .. } => &self.webhook,
            ChannelConfig::Telegram { .. } => &self.telegram,
            ChannelConfig::Slack { .. } => &self.slack,
        }
    }

    /// Deliver to a single channel, bounded by the delivery timeout
    pub async fn send(&self, config: &ChannelConfig, notice: &Notice) -> Result<(), SenderError> {
        match tokio::time::timeout(self.timeout, self.sender_for(config).send(config, notice)).await {
            Ok(result) => result,
            Err(_) => Err(SenderError::Timeout),
        }
    }

    /// Deliver to every channel concurrently and log each failure
    pub async fn dispatch(&self, channels: &[NotificationChannel], notice: &Notice) -> Vec<DeliveryOutcome> {
        let deliveries = channels.iter().map(|channel| async move {
            let result = self.send(&channel.config, notice).await;
            match &result {
                Ok(()) => debug!(channel = %channel.name, kind = channel.config.kind(), "Notification delivered"),
                Err(e) => warn!(
                    channel = %channel.name,
                    kind = channel.config.kind(),
                    target_id = ?notice.target_id,
                    "Notification delivery failed: {}",
                    e
                ),
            }
            DeliveryOutcome { channel_id: channel.id, channel_name: channel.name.clone(), result }
        });

        join_all(deliveries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::MonitorStatus;
    use crate::test_support::webhook_endpoint;
    use chrono::Utc;

    fn channel(id: i64, config: ChannelConfig) -> NotificationChannel {
        NotificationChannel { id, name: format!("channel-{id}"), config }
    }

    fn webhook(url: String) -> ChannelConfig {
        ChannelConfig::Webhook { url, method: "POST".into(), headers: None }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let (ok_url, mut ok_rx) = webhook_endpoint("200 OK").await;
        let (bad_url, mut bad_rx) = webhook_endpoint("500 Internal Server Error").await;

        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        let notice = Notice::status_change(1, "api", MonitorStatus::Down, "timeout", Utc::now());
        let outcomes = dispatcher
            .dispatch(&[channel(1, webhook(bad_url)), channel(2, webhook(ok_url))], &notice)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());

        let delivered = ok_rx.recv().await.unwrap();
        assert!(delivered.contains("\"status\":\"down\""));
        assert!(delivered.contains("[api] [🔴 Down] timeout"));
        assert!(bad_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn slack_and_telegram_payloads() {
        let (url, mut rx) = webhook_endpoint("200 OK").await;
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        let notice = Notice::status_change(1, "api", MonitorStatus::Up, "200 - OK", Utc::now());

        dispatcher.send(&ChannelConfig::Slack { webhook_url: url.clone() }, &notice).await.unwrap();
        assert!(rx.recv().await.unwrap().contains("\"text\":\"[api] [✅ Up] 200 - OK\""));

        let base = url.trim_end_matches("/hook").to_string();
        let telegram = ChannelConfig::Telegram { bot_token: "123:abc".into(), chat_id: "42".into(), api_base: Some(base) };
        dispatcher.send(&telegram, &notice).await.unwrap();
        let request = rx.recv().await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains("\"chat_id\":\"42\""));
    }

    #[tokio::test]
    async fn unsupported_webhook_method_is_a_config_error() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let config = ChannelConfig::Webhook { url: "http://127.0.0.1:1/".into(), method: "DELETE".into(), headers: None };
        let result = dispatcher.send(&config, &Notice::test()).await;
        assert!(matches!(result, Err(SenderError::InvalidConfiguration(_))));
    }
}
