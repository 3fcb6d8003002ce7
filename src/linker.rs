//! Entity linker facade
//!
//! Ties configuration, model loading, the dictionary cache and the retrieval
//! engine together:
//!
//! ```text
//! LinkerConfig ─► StrategyKind ─► Hybrid/DenseStrategy
//!                                        │
//! dictionary ─► DictionaryCache ─────────┴─► RetrievalEngine ─► LinkingSession
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::{DictionaryCache, DictionaryCacheEntry};
use crate::config::LinkerConfig;
use crate::engine::{Candidate, RetrievalEngine};
use crate::error::Result;
use crate::session::{LinkingSession, TextUnit};
use crate::strategy::{DenseStrategy, HybridStrategy, RetrievalStrategy, StrategyKind};

/// A loaded linker: strategy, embedded dictionary and retrieval engine
pub struct EntityLinker {
    engine: RetrievalEngine,
    config: LinkerConfig,
}

impl EntityLinker {
    /// Load the configured model and embed (or reload) the dictionary
    pub fn load(config: &LinkerConfig, dictionary_path: &Path) -> Result<Self> {
        config.validate()?;
        let strategy = load_strategy(config)?;

        let cache = DictionaryCache::with_options(&config.cache_root, config.cache_options());
        let entry = cache.get_or_build(dictionary_path, strategy.as_ref(), config.mean_centering)?;

        info!(
            strategy = %strategy.kind(),
            model = strategy.identifier(),
            entries = entry.len(),
            "Entity linker ready"
        );
        Ok(Self::from_parts(strategy, Arc::new(entry), config.clone()))
    }

    /// Assemble a linker from an already built strategy and cache entry
    pub fn from_parts(
        strategy: Arc<dyn RetrievalStrategy>,
        entry: Arc<DictionaryCacheEntry>,
        config: LinkerConfig,
    ) -> Self {
        let engine = RetrievalEngine::new(strategy, entry)
            .with_batching(config.batching())
            .with_chunk_rows(config.topk_chunk_size);
        Self { engine, config }
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn session(&self) -> LinkingSession<'_> {
        LinkingSession::new(&self.engine)
    }

    /// Top `k` candidates for a single, already normalized mention
    pub fn predict_mention(&self, mention: &str, k: usize) -> Result<Vec<Candidate>> {
        self.engine.predict(mention, k)
    }

    /// Link every `category` mention in `units`
    pub fn predict(&self, units: &mut [TextUnit], category: &str, top_k: usize) -> Result<()> {
        self.session().predict(units, category, top_k)
    }
}

/// Build the configured strategy, resolving model shorthands
pub fn load_strategy(config: &LinkerConfig) -> Result<Arc<dyn RetrievalStrategy>> {
    let kind = config.strategy_kind()?;
    let model = kind.resolve_model_name(&config.model_name);
    info!(strategy = %kind, model = %model, "Loading retrieval strategy");

    Ok(match kind {
        StrategyKind::Hybrid => Arc::new(HybridStrategy::load(
            &model,
            config.max_length,
            config.aggregation,
        )?),
        StrategyKind::Dense => Arc::new(DenseStrategy::load(
            &model,
            config.max_length,
            config.aggregation,
            config.dense_scoring(),
        )?),
    })
}
