//! Tracing setup shared by the vigil binaries.

use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "" => Ok(Self::Compact),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` still wins over `level`; `RUST_LOG_FORMAT` is consulted only when
/// `format` is `None`.
pub fn init(level: &str, format: Option<LogFormat>) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    let format = format.unwrap_or_else(format_from_env);

    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        eprintln!("tracing subscriber already installed: {error}");
    }
}

fn format_from_env() -> LogFormat {
    let raw = var("RUST_LOG_FORMAT").unwrap_or_default();
    raw.parse().unwrap_or_else(|error| {
        warn!("Failed to read RUST_LOG_FORMAT, falling back to compact: {error}");
        LogFormat::Compact
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
