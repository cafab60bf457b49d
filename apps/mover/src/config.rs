//! CLI configuration.
//!
//! Read from `$BYTEMOVER_CONFIG` or `~/.config/bytemover/mover.toml`. A
//! missing file means defaults; the file is never written back.

use std::path::{Path, PathBuf};

use bytemover_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

/// Overrides `transfer.single_buffer_size`.
const BUFFER_SIZE_ENV: &str = "BYTEMOVER_BUFFER_SIZE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_buffer_size(std::env::var(BUFFER_SIZE_ENV).ok().as_deref())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_buffer_size(&mut self, value: Option<&str>) -> anyhow::Result<()> {
        let Some(value) = value else { return Ok(()) };
        let size: usize = value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{BUFFER_SIZE_ENV}={value:?}: {e}"))?;
        anyhow::ensure!(size > 0, "{BUFFER_SIZE_ENV} must be positive");
        self.transfer.single_buffer_size = size;
        Ok(())
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BYTEMOVER_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("bytemover")
        .join("mover.toml")
}
