//! Configuration management for the CLI

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use workload_lib::{resource_map_from_pairs, ResourceDefaults, ResourceMap};

/// CLI configuration
///
/// Read from an optional file and overridden by `WLB_` environment
/// variables, e.g. `WLB_DEFAULT_LIMITS__CPU=200m`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default resource limits used by QoS auto-upgrade
    #[serde(default)]
    pub default_limits: BTreeMap<String, String>,
    /// Default resource requests used by QoS auto-upgrade
    #[serde(default)]
    pub default_requests: BTreeMap<String, String>,
    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from `explicit`, or the per-user file when absent
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = Self::config_path() {
                    builder = builder.add_source(
                        config::File::with_name(&path.to_string_lossy()).required(false),
                    );
                }
            }
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("WLB")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Per-user config file stem; the extension selects the format
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("wlb").join("config"))
    }

    /// Configured output format, if any
    pub fn format(&self) -> Result<Option<OutputFormat>> {
        self.default_format
            .as_deref()
            .map(|value| {
                OutputFormat::from_str(value, true)
                    .map_err(|_| anyhow::anyhow!("Unknown default_format '{value}'"))
            })
            .transpose()
    }

    /// Register configured defaults into `registry`
    ///
    /// Empty tables are skipped so the registry stays unset.
    pub fn register_defaults(&self, registry: &ResourceDefaults) -> Result<()> {
        if !self.default_limits.is_empty() {
            registry
                .register_default_limit(to_resource_map(&self.default_limits)?)
                .context("Invalid default_limits")?;
        }
        if !self.default_requests.is_empty() {
            registry
                .register_default_request(to_resource_map(&self.default_requests)?)
                .context("Invalid default_requests")?;
        }
        Ok(())
    }
}

/// Convert a string-keyed table into a resource map
pub fn to_resource_map(table: &BTreeMap<String, String>) -> Result<ResourceMap> {
    Ok(resource_map_from_pairs(table)?)
}
