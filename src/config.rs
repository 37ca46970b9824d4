use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::source::{PositionConfig, RadioConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub scan: ScanConfig,
    pub radio: RadioConfig,
    pub position: PositionConfig,
}

fn default_http_port() -> u16 {
    8080
}

/// Timing and size of the scanning loops. All durations are milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Non-empty scans averaged by one campaign.
    pub samples: u32,
    pub sample_interval_ms: u64,
    pub location_interval_ms: u64,
    pub detection_interval_ms: u64,
    // used while the radio or location service is unavailable
    pub degraded_interval_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            samples: 100,
            sample_interval_ms: 1000,
            location_interval_ms: 5000,
            detection_interval_ms: 500,
            degraded_interval_ms: 5000,
            cooldown_ms: 5000,
        }
    }
}

impl ScanConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn location_interval(&self) -> Duration {
        Duration::from_millis(self.location_interval_ms)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn degraded_interval(&self) -> Duration {
        Duration::from_millis(self.degraded_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    let mut config: Config = toml::from_str(&data).context("Failed to parse config")?;

    if let Ok(url) = dotenvy::var("DATABASE_URL") {
        config.database_url = url;
    }

    Ok(config)
}
