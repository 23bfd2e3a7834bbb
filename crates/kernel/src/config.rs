use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors loading or validating an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of a map session. Every field has a default, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Squares per portion edge.
    pub portion_size: u32,
    pub ray_near: u32,
    pub ray_far: u32,
    /// Background I/O threads for portion loads.
    pub loader_workers: usize,
    /// Ticks before a failed slot is requested again. `None` never retries.
    pub retry_after_ticks: Option<u64>,
    /// Pixels per square.
    pub square_size: u32,
    /// Keep the entry-point flag of portion files.
    pub honor_entry_point: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portion_size: mapstream_common::DEFAULT_PORTION_SIZE,
            ray_near: 1,
            ray_far: 1,
            loader_workers: 2,
            retry_after_ticks: Some(60),
            square_size: 16,
            honor_entry_point: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portion_size == 0 {
            return Err(ConfigError::Invalid("portion_size must be positive".into()));
        }
        if self.limit() == 0 {
            return Err(ConfigError::Invalid(
                "ray_near + ray_far must be at least 1".into(),
            ));
        }
        if self.loader_workers == 0 {
            return Err(ConfigError::Invalid("loader_workers must be at least 1".into()));
        }
        if self.square_size < 2 || self.square_size % 2 != 0 {
            return Err(ConfigError::Invalid(
                "square_size must be a positive even number".into(),
            ));
        }
        Ok(())
    }

    /// Streaming radius in portions.
    pub fn limit(&self) -> u32 {
        self.ray_near + self.ray_far
    }
}
