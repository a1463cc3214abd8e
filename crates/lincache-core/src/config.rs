//! LinCache configuration module.
//!
//! Provides configuration file support via `lincache.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (embedding runtime)
//! 2. Environment variables (`LINCACHE_*`)
//! 3. Configuration file (`lincache.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Which reuse modes the cache applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseCacheType {
    /// Caching disabled; every probe misses.
    None,
    /// Exact-lineage reuse only (default).
    #[default]
    Full,
    /// Algebraic-rewrite reuse only.
    Partial,
    /// Full and partial reuse combined.
    Hybrid,
    /// Full reuse plus function-scope multi-output reuse.
    Multilevel,
}

impl ReuseCacheType {
    /// Caching disabled entirely.
    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Exact-lineage reuse enabled.
    #[must_use]
    pub fn is_full_reuse(self) -> bool {
        matches!(self, Self::Full | Self::Hybrid | Self::Multilevel)
    }

    /// Rewrite-based partial reuse enabled.
    #[must_use]
    pub fn is_partial_reuse(self) -> bool {
        matches!(self, Self::Partial | Self::Hybrid)
    }

    /// Function-scope multi-output reuse enabled.
    #[must_use]
    pub fn is_multilevel_reuse(self) -> bool {
        matches!(self, Self::Multilevel)
    }
}

impl FromStr for ReuseCacheType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "full" | "full_reuse" => Ok(Self::Full),
            "partial" | "partial_reuse" => Ok(Self::Partial),
            "hybrid" | "hybrid_reuse" => Ok(Self::Hybrid),
            "multilevel" | "multilevel_reuse" => Ok(Self::Multilevel),
            other => Err(Error::Config(format!("unknown cache type '{other}'"))),
        }
    }
}

/// Eviction scoring policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Pure recency.
    Lru,
    /// Keep entries expensive to recompute per byte (default).
    #[default]
    CostNSize,
    /// Keep entries with deep lineage DAGs.
    DagHeight,
    /// Linear combination of recency, cost-per-byte, and DAG height.
    Hybrid,
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lru" => Ok(Self::Lru),
            "costnsize" => Ok(Self::CostNSize),
            "dagheight" => Ok(Self::DagHeight),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::Config(format!("unknown eviction policy '{other}'"))),
        }
    }
}

/// Weights of the `hybrid` eviction policy keep-score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    /// Weight of the normalized recency rank.
    pub recency: f64,
    /// Weight of the normalized exec-time-per-byte score.
    pub cost_size: f64,
    /// Weight of the normalized lineage DAG height.
    pub height: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            recency: 0.25,
            cost_size: 0.5,
            height: 0.25,
        }
    }
}

/// Main LinCache configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Which reuse modes are active.
    pub cache_type: ReuseCacheType,
    /// Eviction scoring policy.
    pub policy: EvictionPolicy,
    /// Spill evicted matrices to disk instead of dropping them.
    pub spill_enabled: bool,
    /// Gate caching on the optimizer's marked-for-caching flag.
    pub comp_assisted_rw: bool,
    /// Fraction of process max memory granted to the cache.
    pub cache_fraction: f64,
    /// Overrides the detected process max memory (bytes).
    pub max_memory_bytes: Option<u64>,
    /// Base directory for the transient spill directory.
    pub workdir: PathBuf,
    /// Replaces the built-in reusable-opcode allow-list.
    pub reusable_opcodes: Option<Vec<String>>,
    /// Hybrid policy keep-score weights.
    pub hybrid_weights: HybridWeights,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: ReuseCacheType::default(),
            policy: EvictionPolicy::default(),
            spill_enabled: true,
            comp_assisted_rw: false,
            cache_fraction: 0.05,
            max_memory_bytes: None,
            workdir: std::env::temp_dir(),
            reusable_opcodes: None,
            hybrid_weights: HybridWeights::default(),
        }
    }
}

impl CacheConfig {
    /// Loads configuration from default sources (`lincache.toml`, env).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from_path("lincache.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LINCACHE_"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if !(self.cache_fraction > 0.0 && self.cache_fraction <= 0.5) {
            return Err(Error::Config(format!(
                "cache_fraction {} is out of range (0, 0.5]",
                self.cache_fraction
            )));
        }

        if let Some(max) = self.max_memory_bytes {
            if max == 0 {
                return Err(Error::Config("max_memory_bytes must be non-zero".into()));
            }
        }

        if let Some(opcodes) = &self.reusable_opcodes {
            if opcodes.iter().any(String::is_empty) {
                return Err(Error::Config(
                    "reusable_opcodes must not contain empty opcodes".into(),
                ));
            }
        }

        let w = &self.hybrid_weights;
        if w.recency < 0.0 || w.cost_size < 0.0 || w.height < 0.0 {
            return Err(Error::Config("hybrid weights must be non-negative".into()));
        }
        if w.recency + w.cost_size + w.height <= 0.0 {
            return Err(Error::Config("hybrid weights must not all be zero".into()));
        }

        Ok(())
    }

    /// The byte budget of the resident cache: `cache_fraction` of the
    /// configured or detected process max memory, fixed at engine init.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cache_limit_bytes(&self) -> u64 {
        let max = self.max_memory_bytes.unwrap_or_else(local_max_memory);
        (self.cache_fraction * max as f64) as u64
    }
}

/// Total memory available to this process, in bytes.
#[must_use]
pub fn local_max_memory() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.total_memory()
}
