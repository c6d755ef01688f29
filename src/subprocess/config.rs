//! Per-command configuration

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{CommandError, Result};
use super::streaming::StreamHandlers;

/// Execution settings shared by every run of a [`SystemCommand`](super::SystemCommand)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Working directory for the child
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables, added to the inherited environment
    pub env: HashMap<String, String>,

    /// Size of each read from stdout/stderr
    pub read_buffer_size: usize,

    /// How long to wait for an exit status once every stream has closed
    #[serde(with = "humantime_serde")]
    pub exit_status_timeout: Option<Duration>,

    /// Signal sent by `kill` when none is given
    #[serde(with = "signal_name")]
    pub kill_signal: Signal,

    /// Parser used for each stream
    #[serde(skip)]
    pub handlers: StreamHandlers,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            env: HashMap::new(),
            read_buffer_size: default_read_buffer_size(),
            exit_status_timeout: Some(default_exit_status_timeout()),
            kill_signal: Signal::SIGTERM,
            handlers: StreamHandlers::default(),
        }
    }
}

fn default_read_buffer_size() -> usize {
    8192
}

fn default_exit_status_timeout() -> Duration {
    Duration::from_secs(10)
}

impl CommandConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| CommandError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| CommandError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(CommandError::Config(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_exit_status_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exit_status_timeout = timeout;
        self
    }

    pub fn with_kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = signal;
        self
    }

    pub fn with_handlers(mut self, handlers: StreamHandlers) -> Self {
        self.handlers = handlers;
        self
    }
}

/// Signals by name, with or without the `SIG` prefix
mod signal_name {
    use nix::sys::signal::Signal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(signal: &Signal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(signal.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Signal, D::Error> {
        let name = String::deserialize(deserializer)?;
        parse(&name).map_err(serde::de::Error::custom)
    }

    pub fn parse(name: &str) -> Result<Signal, String> {
        let upper = name.trim().to_ascii_uppercase();
        let full = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        Signal::from_str(&full).map_err(|_| format!("unknown signal '{name}'"))
    }
}

pub use signal_name::parse as parse_signal;
