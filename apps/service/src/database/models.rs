use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{MonitorStatus, TargetId};
use crate::notification::models::ChannelConfig;

/// Upper bound for the derived probe timeout
const MAX_TIMEOUT_SECS: u64 = 300;

/// Target model - a configured endpoint checked periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Zero until the target has been saved
    #[serde(default)]
    pub id: TargetId,
    #[serde(default = "default_owner")]
    pub owner_id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Wait between ticks while PENDING; zero means "same as interval"
    #[serde(default)]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Probe timeout; derived from the interval when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub upside_down: bool,
    #[serde(default)]
    pub parent_id: Option<TargetId>,
    #[serde(default)]
    pub proxy_id: Option<i64>,
    /// Warn once per certificate when fewer days than this remain
    #[serde(default)]
    pub cert_expiry_warning_days: Option<u32>,
    pub kind: TargetKind,
}

fn default_owner() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

impl Target {
    /// Create a new, unsaved target with default timings
    pub fn new(name: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            id: 0,
            owner_id: default_owner(),
            name: name.into(),
            active: true,
            interval_secs: default_interval(),
            retry_interval_secs: 0,
            max_retries: 0,
            timeout_secs: None,
            upside_down: false,
            parent_id: None,
            proxy_id: None,
            cert_expiry_warning_days: None,
            kind,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        if self.retry_interval_secs == 0 {
            self.interval()
        } else {
            Duration::from_secs(self.retry_interval_secs)
        }
    }

    /// Probe timeout: explicit value, else 80% of the interval, clamped to 1..=300s
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout_secs.unwrap_or_else(|| self.interval_secs.saturating_mul(8) / 10);
        Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS))
    }

    pub fn is_push(&self) -> bool {
        matches!(self.kind, TargetKind::Push(_))
    }

    pub fn push_token(&self) -> Option<&str> {
        match &self.kind {
            TargetKind::Push(settings) => Some(settings.token.as_str()),
            _ => None,
        }
    }
}

/// Protocol-specific configuration, one variant per probe kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetKind {
    Http(HttpSettings),
    Tcp(TcpSettings),
    Dns(DnsSettings),
    Mqtt(MqttSettings),
    Database(DatabaseSettings),
    Push(PushSettings),
    Group,
}

impl TargetKind {
    /// Value stored in the `kind` column
    pub fn name(&self) -> &'static str {
        match self {
            TargetKind::Http(_) => "http",
            TargetKind::Tcp(_) => "tcp",
            TargetKind::Dns(_) => "dns",
            TargetKind::Mqtt(_) => "mqtt",
            TargetKind::Database(_) => "database",
            TargetKind::Push(_) => "push",
            TargetKind::Group => "group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub auth: HttpAuth,
    /// Entries like "200-299" or "301"
    #[serde(default = "default_accepted_status_codes")]
    pub accepted_status_codes: Vec<String>,
    #[serde(default)]
    pub keyword: Option<KeywordRule>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub ignore_tls: bool,
    /// Maximum redirects to follow; zero disables following
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_accepted_status_codes() -> Vec<String> {
    vec!["200-299".to_string()]
}

fn default_max_redirects() -> u32 {
    10
}

impl HttpSettings {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            auth: HttpAuth::None,
            accepted_status_codes: default_accepted_status_codes(),
            keyword: None,
            ignore_tls: false,
            max_redirects: default_max_redirects(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HttpAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Ntlm {
        username: String,
        password: String,
        #[serde(default)]
        domain: String,
        #[serde(default)]
        workstation: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    /// Succeed when the keyword is absent instead
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsSettings {
    pub hostname: String,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default = "default_resolver")]
    pub resolver: String,
    #[serde(default = "default_resolver_port")]
    pub resolver_port: u16,
    /// When set, one of the returned records must equal this value
    #[serde(default)]
    pub expected: Option<String>,
}

fn default_record_type() -> String {
    "A".to_string()
}

fn default_resolver() -> String {
    "1.1.1.1".to_string()
}

fn default_resolver_port() -> u16 {
    53
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub hostname: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Regular expression the received payload must match
    #[serde(default)]
    pub success_pattern: Option<String>,
    /// Published to the topic right after subscribing
    #[serde(default)]
    pub publish_message: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub connection_string: String,
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_query() -> String {
    "SELECT 1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSettings {
    pub token: String,
}

impl PushSettings {
    /// Fresh random token for a new push target
    pub fn generate() -> Self {
        Self { token: uuid::Uuid::new_v4().simple().to_string() }
    }
}

/// Heartbeat model - one persisted probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: Option<i64>,
    pub target_id: TargetId,
    pub timestamp: DateTime<Utc>,
    pub status: MonitorStatus,
    pub response_time_ms: Option<u64>,
    pub message: String,
    pub important: bool,
    /// Consecutive failures at the time of recording
    pub retries: u32,
}

impl Heartbeat {
    /// Convert a timestamp to the millisecond column value
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    /// Convert a millisecond column value back to a timestamp
    pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
    Socks5h,
}

impl ProxyProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Socks5h => "socks5h",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" => Some(ProxyProtocol::Socks5),
            "socks5h" => Some(ProxyProtocol::Socks5h),
            _ => None,
        }
    }
}

/// Proxy model - referenced by targets through `proxy_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Proxy {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

/// Notification channel model - delivery parameters for one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub config: ChannelConfig,
}
