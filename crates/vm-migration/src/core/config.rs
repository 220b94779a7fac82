//! Migration planning configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::migration_policy::MigrationPolicyKind;
use crate::core::usage::LoadThresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value of {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Holds raw migration config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawMigrationConfig {
    pub memory_load_threshold: Option<f64>,
    pub cpu_load_threshold: Option<f64>,
    pub gmetric_thresholds: Option<BTreeMap<String, f64>>,
    pub migration_throttle: Option<usize>,
    pub migrate_to_zero_load_nodes: Option<bool>,
    pub policy: Option<String>,
    pub feasibility_horizon: Option<f64>,
}

/// Represents migration planning configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MigrationConfig {
    /// Memory load threshold as a share of node memory, 0 disables the check.
    pub memory_load_threshold: f64,
    /// CPU load threshold as a share of node CPUs, 0 disables the check.
    pub cpu_load_threshold: f64,
    /// Thresholds of generic metrics.
    pub gmetric_thresholds: BTreeMap<String, f64>,
    /// Maximum number of simultaneous migrations, `None` means unlimited.
    pub migration_throttle: Option<usize>,
    /// Whether nodes without reported load can take part in migrations.
    pub migrate_to_zero_load_nodes: bool,
    /// Policy used by automatic planning.
    pub policy: MigrationPolicyKind,
    /// Duration in seconds the migrated VM must fit into on its destination.
    pub feasibility_horizon: f64,
}

impl MigrationConfig {
    /// Creates migration config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    /// Creates migration config from YAML string.
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let raw: RawMigrationConfig = serde_yaml::from_str(data)?;
        let default = Self::default();

        let policy = match raw.policy {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "policy".to_string(),
                value,
            })?,
            None => default.policy,
        };

        let config = Self {
            memory_load_threshold: raw.memory_load_threshold.unwrap_or(default.memory_load_threshold),
            cpu_load_threshold: raw.cpu_load_threshold.unwrap_or(default.cpu_load_threshold),
            gmetric_thresholds: raw.gmetric_thresholds.unwrap_or_default(),
            migration_throttle: raw.migration_throttle,
            migrate_to_zero_load_nodes: raw.migrate_to_zero_load_nodes.unwrap_or(default.migrate_to_zero_load_nodes),
            policy,
            feasibility_horizon: raw.feasibility_horizon.unwrap_or(default.feasibility_horizon),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("memory_load_threshold", self.memory_load_threshold),
            ("cpu_load_threshold", self.cpu_load_threshold),
            ("feasibility_horizon", self.feasibility_horizon),
        ];
        for (key, value) in checks {
            if !value.is_finite() || value < 0. {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns load thresholds applied to nodes without their own ones.
    pub fn thresholds(&self) -> LoadThresholds {
        LoadThresholds {
            memory: self.memory_load_threshold,
            cpu: self.cpu_load_threshold,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            memory_load_threshold: 0.,
            cpu_load_threshold: 0.,
            gmetric_thresholds: BTreeMap::new(),
            migration_throttle: None,
            migrate_to_zero_load_nodes: false,
            policy: MigrationPolicyKind::Overcommit,
            feasibility_horizon: 3600.,
        }
    }
}
