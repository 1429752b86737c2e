//! Engine configuration from TOML files, `CMDGRAPH_*` environment variables
//! and defaults.

use std::path::Path;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

use crate::geometry::DeviceLimits;
use crate::kernel::DEFAULT_MAX_ARGUMENTS;

// ── Errors ──────────────────────────────────────────────────────────

/// Errors produced by configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── LogLevel ────────────────────────────────────────────────────────

/// Log verbosity for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[graph]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    graph: GraphConfig,
}

// ── GraphConfig ─────────────────────────────────────────────────────

/// Tunables for command-buffer recording and launch resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub warp_size: usize,
    pub max_group_size: usize,
    pub max_kernel_arguments: u32,
    pub default_updatable: bool,
    pub enable_profiling: bool,
    pub in_order: bool,
    pub log_level: LogLevel,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            warp_size: 32,
            max_group_size: 1024,
            max_kernel_arguments: DEFAULT_MAX_ARGUMENTS,
            default_updatable: false,
            enable_profiling: false,
            in_order: true,
            log_level: LogLevel::Warn,
        }
    }
}

impl GraphConfig {
    // ── Constructors ────────────────────────────────────────────

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[graph]` table. A missing file
    /// yields the defaults.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let wrapper: TomlWrapper = toml::from_str(&text)?;
        Ok(wrapper.graph)
    }

    /// Serialize to a TOML string (wrapped in `[graph]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { graph: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Defaults overridden by any `CMDGRAPH_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("CMDGRAPH_WARP_SIZE") {
            cfg.warp_size = Self::parse_env_usize("CMDGRAPH_WARP_SIZE", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_MAX_GROUP_SIZE") {
            cfg.max_group_size = Self::parse_env_usize("CMDGRAPH_MAX_GROUP_SIZE", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_MAX_KERNEL_ARGS") {
            cfg.max_kernel_arguments = Self::parse_env_u32("CMDGRAPH_MAX_KERNEL_ARGS", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_UPDATABLE") {
            cfg.default_updatable = Self::parse_env_bool("CMDGRAPH_UPDATABLE", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_PROFILING") {
            cfg.enable_profiling = Self::parse_env_bool("CMDGRAPH_PROFILING", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_IN_ORDER") {
            cfg.in_order = Self::parse_env_bool("CMDGRAPH_IN_ORDER", &v)?;
        }
        if let Ok(v) = env::var("CMDGRAPH_LOG_LEVEL") {
            cfg.log_level = v.parse()?;
        }

        Ok(cfg)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warp_size == 0 {
            return Err(ConfigError::Validation("warp_size must be >= 1".into()));
        }
        if self.max_group_size == 0 {
            return Err(ConfigError::Validation("max_group_size must be >= 1".into()));
        }
        if !self.max_group_size.is_multiple_of(self.warp_size) {
            return Err(ConfigError::Validation(format!(
                "max_group_size {} is not a multiple of warp_size {}",
                self.max_group_size, self.warp_size
            )));
        }
        if !(1..=256).contains(&self.max_kernel_arguments) {
            return Err(ConfigError::Validation("max_kernel_arguments must be in 1..=256".into()));
        }
        Ok(())
    }

    // ── Merge ───────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        let d = Self::default();
        Self {
            warp_size: if other.warp_size == d.warp_size { self.warp_size } else { other.warp_size },
            max_group_size: if other.max_group_size == d.max_group_size {
                self.max_group_size
            } else {
                other.max_group_size
            },
            max_kernel_arguments: if other.max_kernel_arguments == d.max_kernel_arguments {
                self.max_kernel_arguments
            } else {
                other.max_kernel_arguments
            },
            default_updatable: if other.default_updatable == d.default_updatable {
                self.default_updatable
            } else {
                other.default_updatable
            },
            enable_profiling: if other.enable_profiling == d.enable_profiling {
                self.enable_profiling
            } else {
                other.enable_profiling
            },
            in_order: if other.in_order == d.in_order { self.in_order } else { other.in_order },
            log_level: if other.log_level == d.log_level { self.log_level } else { other.log_level },
        }
    }

    /// Device limits implied by this configuration.
    #[must_use]
    pub fn device_limits(&self) -> DeviceLimits {
        let base = DeviceLimits::default();
        DeviceLimits {
            warp_size: self.warp_size,
            max_group_size: self.max_group_size,
            max_block_dims: [
                self.max_group_size,
                self.max_group_size,
                base.max_block_dims[2].min(self.max_group_size),
            ],
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn parse_env_usize(key: &str, val: &str) -> Result<usize, ConfigError> {
        val.parse::<usize>().map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    fn parse_env_u32(key: &str, val: &str) -> Result<u32, ConfigError> {
        val.parse::<u32>().map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    fn parse_env_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
        match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnvVar { key: key.to_string(), value: val.to_string() }),
        }
    }
}
