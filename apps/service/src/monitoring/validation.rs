//! Target configuration checks run before a loop is started.

use anyhow::{Result, anyhow};
use url::Url;

use crate::database::models::{Target, TargetKind};

const MIN_INTERVAL: u64 = 10; // 10 seconds
const MAX_INTERVAL: u64 = 86400; // 24 hours
const MAX_RETRIES: u32 = 100;

/// Validates the type independent timings and the protocol fields that
/// the probes do not already reject while being built
pub fn validate_target(target: &Target) -> Result<()> {
    if target.name.trim().is_empty() {
        return Err(anyhow!("Target name is empty"));
    }

    validate_check_interval(target.interval_secs)?;
    if target.retry_interval_secs != 0 {
        validate_retry_interval(target.retry_interval_secs)?;
    }
    if let Some(timeout) = target.timeout_secs {
        validate_timeout(timeout)?;
    }
    if target.max_retries > MAX_RETRIES {
        return Err(anyhow!("Too many retries: {} (maximum: {})", target.max_retries, MAX_RETRIES));
    }
    if target.parent_id.is_some() && target.parent_id == Some(target.id) {
        return Err(anyhow!("Target cannot be its own parent"));
    }

    match &target.kind {
        TargetKind::Http(settings) => validate_http_target(&settings.url),
        TargetKind::Tcp(settings) => {
            if settings.hostname.trim().is_empty() {
                return Err(anyhow!("TCP hostname is empty"));
            }
            validate_port(settings.port)
        }
        TargetKind::Mqtt(settings) => validate_port(settings.port),
        TargetKind::Dns(settings) => validate_port(settings.resolver_port),
        TargetKind::Push(settings) => {
            if settings.token.trim().is_empty() {
                return Err(anyhow!("Push token is empty"));
            }
            Ok(())
        }
        TargetKind::Database(_) | TargetKind::Group => Ok(()),
    }
}

/// Validate HTTP/HTTPS target
fn validate_http_target(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for HTTP monitor: {}", other)),
    }

    if url.host_str().is_none() {
        return Err(anyhow!("URL has no host: {}", target));
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    Ok(())
}

/// Validate port is in valid range
fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(anyhow!("Port 0 is not valid"));
    }
    Ok(())
}

/// Validate check interval
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_INTERVAL
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

fn validate_retry_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Retry interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }
    Ok(())
}

/// Validate timeout is reasonable
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 300; // 5 minutes

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "Timeout too short: {} seconds (minimum: {})",
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT
        ));
    }

    Ok(())
}
