use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::orchestration::transform::DEFAULT_TRANSFORM;
use crate::{tlog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Worker executable.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    /// Generator executable for dynamic nodes; defaults to `command`.
    pub generator_command: Option<String>,
    pub generator_args: Option<Vec<String>>,
    /// Transform used by dynamic nodes that do not name one.
    pub default_transform: Option<String>,
}

impl Config {
    pub fn trellis_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".trellis"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::trellis_dir()?.join("trellis.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn effective_args(&self) -> Vec<String> {
        self.args.clone().unwrap_or_else(|| vec!["-p".to_string()])
    }

    pub fn effective_generator_command(&self) -> &str {
        self.generator_command
            .as_deref()
            .unwrap_or_else(|| self.effective_command())
    }

    pub fn effective_generator_args(&self) -> Vec<String> {
        self.generator_args
            .clone()
            .unwrap_or_else(|| self.effective_args())
    }

    pub fn effective_transform(&self) -> &str {
        self.default_transform.as_deref().unwrap_or(DEFAULT_TRANSFORM)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        tlog_debug!(
            "Config loaded: command={:?}, generator_command={:?}, default_transform={:?}",
            config.command,
            config.generator_command,
            config.default_transform
        );
        Ok(config)
    }
}
