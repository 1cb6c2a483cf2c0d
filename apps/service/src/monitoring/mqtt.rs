use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::time::timeout;

use super::checker::Checker;
use super::types::ProbeResult;
use crate::database::models::MqttSettings;

/// Subscribes to one topic and waits for a matching message
pub struct MqttChecker {
    settings: MqttSettings,
    pattern: Option<Regex>,
    timeout_duration: Duration,
}

impl MqttChecker {
    pub fn new(settings: &MqttSettings, timeout_duration: Duration) -> Result<Self, String> {
        if settings.hostname.trim().is_empty() {
            return Err("hostname is empty".to_string());
        }
        if settings.topic.trim().is_empty() {
            return Err("topic is empty".to_string());
        }
        let pattern = settings
            .success_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("invalid success pattern: {e}"))?;

        Ok(Self { settings: settings.clone(), pattern, timeout_duration })
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("vigil-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.settings.hostname.clone(), self.settings.port);
        options.set_keep_alive(Duration::from_secs(5));
        if let Some(username) = &self.settings.username {
            options.set_credentials(username.clone(), self.settings.password.clone().unwrap_or_default());
        }
        options
    }

    async fn wait_for_message(&self, client: &AsyncClient, mut eventloop: rumqttc::EventLoop) -> Result<String, String> {
        let topic = self.settings.topic.as_str();
        client.subscribe(topic, QoS::AtMostOnce).await.map_err(|e| format!("subscribe failed: {e}"))?;
        if let Some(message) = &self.settings.publish_message {
            client
                .publish(topic, QoS::AtMostOnce, false, message.clone().into_bytes())
                .await
                .map_err(|e| format!("publish failed: {e}"))?;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(String::from_utf8_lossy(&publish.payload).into_owned());
                }
                Ok(_) => {}
                Err(e) => return Err(format!("MQTT connection error: {e}")),
            }
        }
    }
}

#[async_trait]
impl Checker for MqttChecker {
    async fn check(&self) -> ProbeResult {
        let start = Instant::now();
        let (client, eventloop) = AsyncClient::new(self.options(), 10);

        let received = timeout(self.timeout_duration, self.wait_for_message(&client, eventloop)).await;
        let _ = client.try_disconnect();

        let payload = match received {
            Ok(Ok(payload)) => payload,
            Ok(Err(message)) => return ProbeResult::down(message),
            Err(_) => return ProbeResult::down("Timeout waiting for a message"),
        };
        let latency = start.elapsed().as_millis() as u64;

        let summary = format!("Topic: {}; Message: {}", self.settings.topic, payload);
        match &self.pattern {
            Some(pattern) if !pattern.is_match(&payload) => {
                ProbeResult::down(format!("Message mismatch - {summary}")).with_latency(latency)
            }
            _ => ProbeResult::up(latency, summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            hostname: "broker.local".into(),
            port: 1883,
            topic: "sensors/door".into(),
            username: None,
            password: None,
            success_pattern: Some("^closed$".into()),
            publish_message: None,
        }
    }

    #[test]
    fn validates_settings() {
        assert!(MqttChecker::new(&settings(), Duration::from_secs(1)).is_ok());

        let mut bad = settings();
        bad.success_pattern = Some("(".into());
        assert!(MqttChecker::new(&bad, Duration::from_secs(1)).is_err());

        let mut bad = settings();
        bad.topic = " ".into();
        assert!(MqttChecker::new(&bad, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut settings = settings();
        settings.hostname = "127.0.0.1".into();
        settings.port = port;
        let result = MqttChecker::new(&settings, Duration::from_secs(2)).unwrap().check().await;
        assert!(!result.success);
    }
}
