//! Application configuration
//!
//! Settings of the binary itself, plus the command configuration it loads.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::subprocess::CommandConfig;

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Optional TOML file with command settings
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Load the command configuration, falling back to defaults without a file.
    pub fn command_config(&self) -> Result<CommandConfig> {
        match &self.config_path {
            Some(path) => CommandConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(CommandConfig::default()),
        }
    }
}
