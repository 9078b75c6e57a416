//! Reader configuration
//!
//! Loaded from, in increasing precedence:
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config directory (or `READMARK_CONFIG`)
//! 3. `READMARK_*` environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::pool::DEFAULT_SLOT_COUNT;

const ENV_PREFIX: &str = "READMARK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Number of books whose reading state is kept.
    pub slot_count: usize,
    /// Seconds between scroll-idle position saves.
    pub save_interval_secs: u64,
    pub viewport_height: u32,
    pub scroll_step: u32,
    /// Route pieces stripped from a location to obtain the book id.
    pub route_prefix: String,
    pub route_suffix: String,
    /// Overrides the platform data directory for slot files.
    pub state_dir: Option<PathBuf>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            save_interval_secs: 10,
            viewport_height: 40,
            scroll_step: 4,
            route_prefix: "/porcula/book/".to_string(),
            route_suffix: "/render".to_string(),
            state_dir: None,
        }
    }
}

impl ReaderConfig {
    pub fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("net", "readmark", "readmark")
            .ok_or_else(|| anyhow!("unable to resolve platform data directories"))
    }

    pub fn load() -> Result<Self> {
        let path = match std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::project_dirs()?.config_dir().join("config.toml"),
        };
        Self::load_from_path(&path)
    }

    /// Missing files fall back to defaults; env overrides still apply.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            Self::parse(&content).with_context(|| format!("in config file {:?}", path))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ReaderConfig = toml::from_str(content).context("failed to parse config TOML")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_parsed::<usize>("SLOT_COUNT") {
            self.slot_count = val.max(1);
        }
        if let Some(val) = env_parsed::<u64>("SAVE_INTERVAL_SECS") {
            self.save_interval_secs = val;
        }
        if let Some(val) = env_parsed::<u32>("VIEWPORT_HEIGHT") {
            self.viewport_height = val;
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_STATE_DIR")) {
            self.state_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }

    pub fn resolve_state_dir(&self, dirs: &ProjectDirs) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| dirs.data_local_dir().join("state"))
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .and_then(|val| val.trim().parse().ok())
}
