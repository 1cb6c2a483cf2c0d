use async_trait::async_trait;
use reqwest::{Client, Method, header};
use serde::Serialize;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notification::models::{ChannelConfig, Notice};

/// A sender for pushing notifications via a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    notice: &'a Notice,
    headline: String,
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, config: &ChannelConfig, notice: &Notice) -> Result<(), SenderError> {
        let ChannelConfig::Webhook { url, method, headers } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!("Unsupported HTTP method: {}", method)));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header name: {}", e)))?;
                let header_value = header::HeaderValue::from_str(value)
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header value: {}", e)))?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        let payload = WebhookPayload { notice, headline: notice.headline() };
        request_builder = if http_method == Method::GET {
            request_builder.query(&[("msg", payload.headline.as_str())])
        } else {
            request_builder.json(&payload)
        };

        let response = request_builder.send().await?;
        ensure_success(response, "Webhook").await
    }
}
