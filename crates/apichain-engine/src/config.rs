//! Run configuration for the stateful phase.
//!
//! Values come from JSON (`StatefulConfig::from_json_str`) or from
//! environment variables overlaid on the defaults:
//! - `APICHAIN_STEP_BUDGET`: steps per scenario (default: 6)
//! - `APICHAIN_MAX_OPERATIONS_PER_SOURCE`: lower bound of the per-source fan-out cap (default: 2)
//! - `APICHAIN_MAX_ROOT_SOURCES`: concurrently explored root chains per operation (default: 2)
//! - `APICHAIN_SEED`: seed for link-vs-fresh sampling (default: random)
//! - `APICHAIN_DEPENDENCY_ANALYSIS`: `true`/`false`, infer links from schemas (default: true)

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use apichain_core::InferenceConfig;

use crate::error::ConfigError;

pub const DEFAULT_STEP_BUDGET: usize = 6;
pub const DEFAULT_MAX_OPERATIONS_PER_SOURCE_CAP: usize = 2;
pub const DEFAULT_MAX_ROOT_SOURCES: usize = 2;

/// Knobs of one stateful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatefulConfig {
    /// Step budget of the external driver; spread across link sources.
    pub step_budget: usize,
    /// Fan-out per source never drops below this.
    pub max_operations_per_source_cap: usize,
    pub max_root_sources: usize,
    pub seed: Option<u64>,
    pub inference: InferenceConfig,
}

impl Default for StatefulConfig {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            max_operations_per_source_cap: DEFAULT_MAX_OPERATIONS_PER_SOURCE_CAP,
            max_root_sources: DEFAULT_MAX_ROOT_SOURCES,
            seed: None,
            inference: InferenceConfig::default(),
        }
    }
}

impl StatefulConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Defaults overlaid with the `APICHAIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = parse_var(&lookup, "APICHAIN_STEP_BUDGET")? {
            config.step_budget = value;
        }
        if let Some(value) = parse_var(&lookup, "APICHAIN_MAX_OPERATIONS_PER_SOURCE")? {
            config.max_operations_per_source_cap = value;
        }
        if let Some(value) = parse_var(&lookup, "APICHAIN_MAX_ROOT_SOURCES")? {
            config.max_root_sources = value;
        }
        if let Some(value) = parse_var(&lookup, "APICHAIN_SEED")? {
            config.seed = Some(value);
        }
        if let Some(value) = parse_var(&lookup, "APICHAIN_DEPENDENCY_ANALYSIS")? {
            config.inference.dependency_analysis = value;
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })
}
