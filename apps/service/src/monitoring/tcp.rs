use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::checker::Checker;
use super::types::ProbeResult;
use crate::database::models::TcpSettings;

/// TCP port checker
pub struct TcpChecker {
    hostname: String,
    port: u16,
    timeout_duration: Duration,
}

impl TcpChecker {
    pub fn new(settings: &TcpSettings, timeout_duration: Duration) -> Self {
        Self { hostname: settings.hostname.clone(), port: settings.port, timeout_duration }
    }
}

#[async_trait]
impl Checker for TcpChecker {
    async fn check(&self) -> ProbeResult {
        let start = Instant::now();

        let connect = TcpStream::connect((self.hostname.as_str(), self.port));

        match timeout(self.timeout_duration, connect).await {
            Ok(Ok(_stream)) => {
                let latency = start.elapsed().as_millis() as u64;
                ProbeResult::up(latency, format!("{} ms", latency))
            }
            Ok(Err(e)) => ProbeResult::down(format!("TCP connection failed: {}", e)),
            Err(_) => ProbeResult::down("TCP connection timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_port_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let checker = TcpChecker::new(&TcpSettings { hostname: "127.0.0.1".into(), port }, Duration::from_secs(2));
        let result = checker.check().await;
        assert!(result.success, "{}", result.message);
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn closed_port_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = TcpChecker::new(&TcpSettings { hostname: "127.0.0.1".into(), port }, Duration::from_secs(2));
        let result = checker.check().await;
        assert!(!result.success);
        assert!(result.message.starts_with("TCP connection failed"));
    }
}
