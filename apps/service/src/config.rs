use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Optional TOML file with targets, channels and proxies to load at boot
    pub seed: Option<path::PathBuf>,
    pub database: Database,
    pub http: Http,
    pub engine: Engine,
    pub retention: Retention,
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    /// Random first-tick delay range added per target on `start_all`
    pub start_jitter_min_ms: u64,
    pub start_jitter_max_ms: u64,
    /// Slack added to a push target's interval before it is failed
    pub push_grace_secs: u64,
    /// How long `stop` waits for a loop before aborting it
    pub stop_timeout_secs: u64,
    pub notification_timeout_secs: u64,
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub keep_days: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// "compact" or "json"
    pub format: String,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: default_data_dir().join("vigil.db"), max_connections: 16 }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self { enabled: true, bind: "127.0.0.1".into(), port: 3001 }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            start_jitter_min_ms: 300,
            start_jitter_max_ms: 1000,
            push_grace_secs: 10,
            stop_timeout_secs: 5,
            notification_timeout_secs: 10,
            event_capacity: 256,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self { keep_days: 180, cleanup_interval_secs: 3600 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Engine {
    pub fn push_grace(&self) -> Duration {
        Duration::from_secs(self.push_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.max(1))
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs.max(1))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

/// $XDG_DATA_HOME/vigil, falling back to ~/.local/share/vigil or the working directory
fn default_data_dir() -> path::PathBuf {
    if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home).join("vigil")
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share/vigil")
    } else {
        path::PathBuf::from(".")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "HTTP")?;
        write_1(f, "Enabled", &self.http.enabled)?;
        write_1(f, "Bind Address", &self.http.bind)?;
        write_1(f, "Port", &self.http.port)?;

        write_title_1(f, "Engine")?;
        write_1(
            f,
            "Start Jitter",
            &format!("{}-{} ms", self.engine.start_jitter_min_ms, self.engine.start_jitter_max_ms),
        )?;
        write_1(f, "Push Grace", &format!("{} s", self.engine.push_grace_secs))?;
        write_1(f, "Stop Timeout", &format!("{} s", self.engine.stop_timeout_secs))?;
        write_1(f, "Notification Timeout", &format!("{} s", self.engine.notification_timeout_secs))?;

        write_title_1(f, "Retention")?;
        write_1(f, "Keep Days", &self.retention.keep_days)?;
        write_1(f, "Cleanup Interval", &format!("{} s", self.retention.cleanup_interval_secs))?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        if let Some(seed) = &self.seed {
            write_title_1(f, "Seed")?;
            write_1(f, "File", &seed.display())?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// let cfg = vigil_service::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), vigil_service::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.retention.keep_days, 180);
        assert!(dir.path().join("nested/config.toml").exists());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[http]\nport = 8080\n\n[engine]\npush_grace_secs = 30\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.bind, "127.0.0.1");
        assert_eq!(config.engine.push_grace(), Duration::from_secs(30));
        assert_eq!(config.engine.start_jitter_min_ms, 300);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[http\nport = ").unwrap();
        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn display_lists_sections() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Retention"));
        assert!(rendered.contains("Keep Days: 180"));
    }
}
