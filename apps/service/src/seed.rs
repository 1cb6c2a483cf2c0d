//! Boot-time seed file: proxies, notification channels and targets in TOML.
//!
//! Entries are matched by name, so applying the same file twice updates rows
//! instead of duplicating them. Targets refer to proxies, channels and parent
//! groups by name.
//!
//! ```toml
//! [[channels]]
//! name = "ops"
//! config = { type = "slack", webhook_url = "https://hooks.slack.com/services/..." }
//!
//! [[targets]]
//! name = "api"
//! interval_secs = 60
//! channels = ["ops"]
//! kind = { type = "http", url = "https://api.example.com/health" }
//! ```

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::database::TargetRepository;
use crate::database::models::{NotificationChannel, Proxy, Target};

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub proxies: Vec<Proxy>,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub targets: Vec<SeedTarget>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTarget {
    #[serde(flatten)]
    pub target: Target,
    /// Proxy name
    #[serde(default)]
    pub proxy: Option<String>,
    /// Name of a group target defined earlier in the file or already stored
    #[serde(default)]
    pub parent: Option<String>,
    /// Channel names to notify
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub proxies: usize,
    pub channels: usize,
    pub targets: usize,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Upsert everything in order: proxies, channels, then targets with their bindings
    pub async fn apply(&self, repo: &dyn TargetRepository) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for proxy in &self.proxies {
            let mut proxy = proxy.clone();
            proxy.id = repo.find_proxy_by_name(&proxy.name).await?.map(|p| p.id).unwrap_or(0);
            repo.save_proxy(&proxy).await?;
            report.proxies += 1;
        }

        for channel in &self.channels {
            let mut channel = channel.clone();
            channel.id = repo.find_channel_by_name(&channel.name).await?.map(|c| c.id).unwrap_or(0);
            repo.save_channel(&channel).await?;
            report.channels += 1;
        }

        for entry in &self.targets {
            self.apply_target(repo, entry).await.with_context(|| format!("seeding target `{}`", entry.target.name))?;
            report.targets += 1;
        }

        info!(proxies = report.proxies, channels = report.channels, targets = report.targets, "Seed applied");
        Ok(report)
    }

    async fn apply_target(&self, repo: &dyn TargetRepository, entry: &SeedTarget) -> Result<()> {
        let mut target = entry.target.clone();
        target.id = repo.find_target_by_name(&target.name).await?.map(|t| t.id).unwrap_or(0);

        target.proxy_id = match &entry.proxy {
            Some(name) => Some(repo.find_proxy_by_name(name).await?.ok_or_else(|| anyhow!("unknown proxy `{name}`"))?.id),
            None => None,
        };
        target.parent_id = match &entry.parent {
            Some(name) => {
                Some(repo.find_target_by_name(name).await?.ok_or_else(|| anyhow!("unknown parent `{name}`"))?.id)
            }
            None => None,
        };

        let mut channel_ids = Vec::with_capacity(entry.channels.len());
        for name in &entry.channels {
            let channel = repo.find_channel_by_name(name).await?.ok_or_else(|| anyhow!("unknown channel `{name}`"))?;
            channel_ids.push(channel.id);
        }

        let id = repo.save_target(&target).await?;
        repo.set_target_channels(id, &channel_ids).await
    }
}
