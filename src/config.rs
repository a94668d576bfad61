// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "FEED_CONFIG_PATH";
pub const ENV_PAGE_SIZE: &str = "FEED_PAGE_SIZE";
pub const ENV_SNAPSHOT_DIR: &str = "FEED_SNAPSHOT_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "config/feed.toml";

const MAX_PAGE_SIZE: usize = 100;

fn default_page_size() -> usize {
    20
}
fn default_snapshot_ms() -> u64 {
    0
}
fn default_initial_ms() -> u64 {
    50
}
fn default_edit_ms() -> u64 {
    300
}
fn default_freshness_secs() -> u64 {
    60
}
fn default_max_age_secs() -> u64 {
    24 * 3600
}

/// Debounce delays per phase, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// First load right after a snapshot was served.
    #[serde(default = "default_snapshot_ms")]
    pub snapshot_ms: u64,
    /// First load with nothing on screen.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Every later criteria change.
    #[serde(default = "default_edit_ms")]
    pub edit_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            snapshot_ms: default_snapshot_ms(),
            initial_ms: default_initial_ms(),
            edit_ms: default_edit_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// File-backed store directory; in-memory when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            freshness_secs: default_freshness_secs(),
            max_age_secs: default_max_age_secs(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            debounce: DebounceConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: FeedConfig = toml::from_str(s).context("parsing feed config")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load order:
    /// 1) $FEED_CONFIG_PATH
    /// 2) config/feed.toml
    /// 3) built-in defaults
    ///
    /// `FEED_PAGE_SIZE` / `FEED_SNAPSHOT_DIR` override whatever was loaded.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var(ENV_PAGE_SIZE)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            self.page_size = n;
        }
        if let Ok(dir) = std::env::var(ENV_SNAPSHOT_DIR) {
            if !dir.trim().is_empty() {
                self.snapshot.dir = Some(PathBuf::from(dir.trim()));
            }
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }
}
