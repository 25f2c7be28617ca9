//! Bridge Configuration
//!
//! Handles parsing of hostlink.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pool::DEFAULT_BUFFER_CAPACITY;

/// Name of the configuration file searched for
pub const CONFIG_FILE_NAME: &str = "hostlink.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "HOSTLINK_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching hostlink.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Result buffer pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Shared libraries bound through export manifests
    #[serde(default)]
    pub native: NativeConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        if let Some(dir) = path.parent() {
            config.native.resolve_relative_to(dir);
        }
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Load the file named by `HOSTLINK_CONFIG`, or search up from the
    /// current directory.
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => {
                let cwd = std::env::current_dir()?;
                Self::find_and_load(&cwd)
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.max_idle == 0 {
            return Err(ConfigError::Invalid {
                key: "pool.max_idle",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pool.prefill > self.pool.max_idle {
            return Err(ConfigError::Invalid {
                key: "pool.prefill",
                reason: format!(
                    "{} exceeds pool.max_idle ({})",
                    self.pool.prefill, self.pool.max_idle
                ),
            });
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Install a subscriber when the module loads
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `EnvFilter` directives, overridden by `HOSTLINK_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub ansi: bool,
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "hostlink=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: default_filter(),
            ansi: false,
        }
    }
}

/// Result buffer pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Buffers allocated when the module loads
    #[serde(default = "default_prefill")]
    pub prefill: usize,

    /// Idle buffers kept for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Initial capacity of each buffer in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_prefill() -> usize {
    8
}

fn default_max_idle() -> usize {
    64
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prefill: default_prefill(),
            max_idle: default_max_idle(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Native library settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NativeConfig {
    /// Extra directories searched for shared libraries
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Export manifests registered on load
    #[serde(default)]
    pub manifests: Vec<PathBuf>,
}

impl NativeConfig {
    /// Make relative paths relative to the config file's directory.
    fn resolve_relative_to(&mut self, dir: &Path) {
        for path in self.search_paths.iter_mut().chain(self.manifests.iter_mut()) {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}
