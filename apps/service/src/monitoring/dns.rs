use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;

use super::checker::Checker;
use super::types::ProbeResult;
use crate::database::models::DnsSettings;

const SUPPORTED_RECORD_TYPES: &[&str] = &["A", "AAAA", "CAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT"];

/// DNS record checker against a single configured resolver
pub struct DnsChecker {
    hostname: String,
    record_type: RecordType,
    resolver: SocketAddr,
    expected: Option<String>,
    timeout_duration: Duration,
}

impl DnsChecker {
    pub fn new(settings: &DnsSettings, timeout_duration: Duration) -> Result<Self, String> {
        let record_name = settings.record_type.trim().to_ascii_uppercase();
        if !SUPPORTED_RECORD_TYPES.contains(&record_name.as_str()) {
            return Err(format!("unsupported DNS record type `{}`", settings.record_type));
        }
        let record_type =
            RecordType::from_str(&record_name).map_err(|_| format!("unsupported DNS record type `{record_name}`"))?;

        let ip = IpAddr::from_str(settings.resolver.trim())
            .map_err(|_| format!("resolver must be an IP address, got `{}`", settings.resolver))?;

        if settings.hostname.trim().is_empty() {
            return Err("hostname is empty".to_string());
        }

        Ok(Self {
            hostname: settings.hostname.trim().to_string(),
            record_type,
            resolver: SocketAddr::new(ip, settings.resolver_port),
            expected: settings.expected.as_ref().map(|e| normalize(e)),
            timeout_duration,
        })
    }

    fn resolver(&self) -> TokioAsyncResolver {
        let servers = NameServerConfigGroup::from_ips_clear(&[self.resolver.ip()], self.resolver.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout_duration;
        opts.attempts = 1;
        opts.cache_size = 0;

        TokioAsyncResolver::tokio(config, opts)
    }
}

/// Lowercase and drop the trailing root dot so names compare equal
fn normalize(record: &str) -> String {
    record.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl Checker for DnsChecker {
    async fn check(&self) -> ProbeResult {
        let start = Instant::now();

        let lookup = match self.resolver().lookup(self.hostname.as_str(), self.record_type).await {
            Ok(lookup) => lookup,
            Err(e) => return ProbeResult::down(format!("DNS lookup failed: {e}")),
        };
        let latency = start.elapsed().as_millis() as u64;

        let records: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
        if records.is_empty() {
            return ProbeResult::down("No records returned").with_latency(latency);
        }

        let summary = format!("Records: {}", records.join(" | "));
        match &self.expected {
            Some(expected) if !records.iter().any(|r| &normalize(r) == expected) => {
                ProbeResult::down(format!("Expected {expected} not in answer. {summary}")).with_latency(latency)
            }
            _ => ProbeResult::up(latency, summary),
        }
    }
}
