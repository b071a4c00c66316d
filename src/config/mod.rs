//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::encoder::FrameRate;

pub mod types;

pub use types::{DeviceConfig, LoggingConfig, SessionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Encode session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Encoder device configuration
    #[serde(default)]
    pub device: DeviceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Result<Self> {
        Ok(Config {
            session: SessionConfig::default(),
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.session
            .validate()
            .context("Invalid [session] configuration")?;

        match self.device.backend.to_lowercase().as_str() {
            "auto" | "synthetic" => {}
            _ => anyhow::bail!("Invalid device backend: {}", self.device.backend),
        }

        if self.device.queue_depth == 0 {
            anyhow::bail!("device.queue_depth must be at least 1");
        }
        if self.device.idr_interval_gops == 0 {
            anyhow::bail!("device.idr_interval_gops must be at least 1");
        }
        if self.device.gop_length == Some(0) {
            anyhow::bail!("device.gop_length must be at least 1");
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        width: Option<u32>,
        height: Option<u32>,
        fps: Option<u32>,
    ) -> Self {
        if let Some(width) = width {
            self.session.width = width;
        }
        if let Some(height) = height {
            self.session.height = height;
        }
        if let Some(fps) = fps {
            self.session.frame_rate = FrameRate::fps(fps);
        }

        self
    }
}
