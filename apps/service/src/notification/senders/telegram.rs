use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notification::models::{ChannelConfig, Notice};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
}

impl TelegramSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Escapes text for Telegram MarkdownV2.
/// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped_text = String::with_capacity(text.len());
    for char_to_escape in text.chars() {
        match char_to_escape {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|' | '{' | '}'
            | '.' | '!' => {
                escaped_text.push('\\');
                escaped_text.push(char_to_escape);
            }
            _ => escaped_text.push(char_to_escape),
        }
    }
    escaped_text
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, config: &ChannelConfig, notice: &Notice) -> Result<(), SenderError> {
        let ChannelConfig::Telegram { bot_token, chat_id, api_base } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Telegram config, but found a different type.".to_string(),
            ));
        };

        let base = api_base.as_deref().unwrap_or(DEFAULT_API_BASE).trim_end_matches('/');
        let api_url = format!("{base}/bot{bot_token}/sendMessage");

        let escaped_message = escape_markdown_v2(&notice.headline());
        let payload = TelegramMessage { chat_id, text: &escaped_message, parse_mode: "MarkdownV2" };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        ensure_success(response, "Telegram API").await
    }
}
