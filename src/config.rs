//! Linker configuration
//!
//! Loaded from YAML, then optionally overridden from the environment:
//!
//! ```yaml
//! model_name: sapbert-ncbi-disease
//! strategy: biosyn
//! cache_root: /var/cache/concept-linker
//! max_length: 25
//! mean_centering: false
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bert::{Aggregation, DEFAULT_MAX_LENGTH};
use crate::cache::CacheOptions;
use crate::encoder::DEFAULT_BATCH_SIZE;
use crate::engine::DEFAULT_CHUNK_ROWS;
use crate::error::{LinkerError, Result};
use crate::fusion::DenseScoring;
use crate::strategy::{Batching, StrategyKind};

/// Environment variable overriding the model name
pub const ENV_MODEL: &str = "LINKER_MODEL";
/// Environment variable overriding the strategy
pub const ENV_STRATEGY: &str = "LINKER_STRATEGY";
/// Environment variable overriding the cache root
pub const ENV_CACHE_ROOT: &str = "LINKER_CACHE_ROOT";

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "sapbert-ncbi-disease";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Hub repository, local directory, or a known shorthand
    pub model_name: String,
    /// `biosyn` or `sapbert`; validated when the linker is built
    pub strategy: String,
    pub cache_root: PathBuf,
    pub max_length: usize,
    pub dense_batch_size: usize,
    pub sparse_batch_size: usize,
    pub topk_chunk_size: usize,
    pub mean_centering: bool,
    pub fingerprint_cache_key: bool,
    pub aggregation: Aggregation,
    /// Dense-only strategy: cosine similarity instead of dot product
    pub cosine: bool,
    /// Dense-only strategy: min-max normalize scores
    pub normalize_scores: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            strategy: StrategyKind::Hybrid.to_string(),
            cache_root: default_cache_root(),
            max_length: DEFAULT_MAX_LENGTH,
            dense_batch_size: DEFAULT_BATCH_SIZE,
            sparse_batch_size: DEFAULT_BATCH_SIZE,
            topk_chunk_size: DEFAULT_CHUNK_ROWS,
            mean_centering: false,
            fingerprint_cache_key: false,
            aggregation: Aggregation::Cls,
            cosine: false,
            normalize_scores: false,
        }
    }
}

impl LinkerConfig {
    /// Read a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkerError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| LinkerError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty document deserializes as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| LinkerError::Config(format!("Invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `LINKER_MODEL`, `LINKER_STRATEGY` and `LINKER_CACHE_ROOT`
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any variable source keyed like the environment
    pub fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(model) = var(ENV_MODEL) {
            self.model_name = model;
        }
        if let Some(strategy) = var(ENV_STRATEGY) {
            self.strategy = strategy;
        }
        if let Some(root) = var(ENV_CACHE_ROOT) {
            self.cache_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("dense_batch_size", self.dense_batch_size),
            ("sparse_batch_size", self.sparse_batch_size),
            ("topk_chunk_size", self.topk_chunk_size),
            ("max_length", self.max_length),
        ] {
            if value == 0 {
                return Err(LinkerError::Config(format!("{name} must be positive")));
            }
        }
        if self.model_name.trim().is_empty() {
            return Err(LinkerError::Config("model_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn strategy_kind(&self) -> Result<StrategyKind> {
        self.strategy.parse()
    }

    /// Model name with strategy shorthands expanded
    pub fn resolved_model_name(&self) -> Result<String> {
        Ok(self.strategy_kind()?.resolve_model_name(&self.model_name))
    }

    pub fn batching(&self) -> Batching {
        Batching {
            dense: self.dense_batch_size,
            sparse: self.sparse_batch_size,
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            batching: self.batching(),
            fingerprint: self.fingerprint_cache_key,
        }
    }

    pub fn dense_scoring(&self) -> DenseScoring {
        DenseScoring {
            cosine: self.cosine,
            normalize: self.normalize_scores,
        }
    }
}

/// `$LINKER_CACHE_ROOT`, else `$HOME/.cache/concept-linker`, else a local dir
pub fn default_cache_root() -> PathBuf {
    if let Some(root) = std::env::var_os(ENV_CACHE_ROOT) {
        return PathBuf::from(root);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("concept-linker"),
        None => PathBuf::from(".concept-linker-cache"),
    }
}
