use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notification::models::{ChannelConfig, Notice};

/// Posts to a Slack incoming webhook
pub struct SlackSender {
    client: Client,
}

impl SlackSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for SlackSender {
    async fn send(&self, config: &ChannelConfig, notice: &Notice) -> Result<(), SenderError> {
        let ChannelConfig::Slack { webhook_url } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Slack config, but found a different type.".to_string(),
            ));
        };

        let response = self.client.post(webhook_url).json(&json!({ "text": notice.headline() })).send().await?;
        ensure_success(response, "Slack webhook").await
    }
}
