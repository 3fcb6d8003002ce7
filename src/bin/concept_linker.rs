//! concept-linker - link biomedical mentions to dictionary concepts
//!
//! Usage:
//!   concept-linker [--config linker.yaml] [--model NAME] [--strategy biosyn|sapbert] <command>
//!
//! Commands:
//!   build-cache    Embed a dictionary and persist the cache
//!   link           Print the top-k candidates of each mention as JSON
//!   fit-sparse     Fit a character n-gram vocabulary on a dictionary
//!   inspect-cache  Print statistics of a cached dictionary
//!
//! Logging is controlled by RUST_LOG (default `concept_linker=info`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use concept_linker::cache::DictionaryCache;
use concept_linker::{
    normalize_mention, Candidate, CharNgramEncoder, Dictionary, EntityLinker, LinkerConfig,
};

#[derive(Parser)]
#[command(name = "concept-linker")]
#[command(about = "Biomedical entity linking against concept dictionaries")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model name, hub repository or local directory
    #[arg(long, global = true)]
    model: Option<String>,

    /// Retrieval strategy (biosyn or sapbert)
    #[arg(long, global = true)]
    strategy: Option<String>,

    /// Root directory for dictionary caches
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a dictionary and persist the cache
    BuildCache {
        /// Dictionary file (CUI||name per line)
        #[arg(long)]
        dictionary: PathBuf,
    },

    /// Link mentions and print candidates as JSON
    Link {
        #[arg(long)]
        dictionary: PathBuf,
        /// Candidates per mention
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Skip mention normalization
        #[arg(long)]
        raw: bool,
        mentions: Vec<String>,
    },

    /// Fit a character n-gram vocabulary on a dictionary's names
    FitSparse {
        #[arg(long)]
        dictionary: PathBuf,
        /// Output JSON file (usually <model dir>/sparse_encoder.json)
        #[arg(long)]
        output: PathBuf,
    },

    /// Print statistics of a cached dictionary
    InspectCache {
        #[arg(long)]
        dictionary: PathBuf,
    },
}

#[derive(Serialize)]
struct LinkOutput<'a> {
    mention: &'a str,
    candidates: Vec<Candidate>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concept_linker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::BuildCache { dictionary } => build_cache(&config, &dictionary),
        Command::Link {
            dictionary,
            top_k,
            raw,
            mentions,
        } => link(&config, &dictionary, top_k, raw, &mentions),
        Command::FitSparse { dictionary, output } => fit_sparse(&dictionary, &output),
        Command::InspectCache { dictionary } => inspect_cache(&config, &dictionary),
    }
}

/// File, then environment, then command line
fn resolve_config(cli: &Cli) -> Result<LinkerConfig> {
    resolve_config_with(cli, |key| std::env::var(key).ok())
}

fn resolve_config_with(
    cli: &Cli,
    var: impl Fn(&str) -> Option<String>,
) -> Result<LinkerConfig> {
    let mut config = match &cli.config {
        Some(path) => LinkerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LinkerConfig::default(),
    };
    config.apply_vars(var);

    if let Some(model) = &cli.model {
        config.model_name = model.clone();
    }
    if let Some(strategy) = &cli.strategy {
        config.strategy = strategy.clone();
    }
    if let Some(root) = &cli.cache_root {
        config.cache_root = root.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_cache(config: &LinkerConfig, dictionary: &Path) -> Result<()> {
    let linker = EntityLinker::load(config, dictionary)
        .with_context(|| format!("Failed to build cache for {}", dictionary.display()))?;
    println!("{}", linker.engine().entry().stats());
    Ok(())
}

fn link(
    config: &LinkerConfig,
    dictionary: &Path,
    top_k: usize,
    raw: bool,
    mentions: &[String],
) -> Result<()> {
    let linker = EntityLinker::load(config, dictionary).context("Failed to load linker")?;

    let queries: Vec<String> = if raw {
        mentions.to_vec()
    } else {
        mentions.iter().map(|m| normalize_mention(m)).collect()
    };
    let query_refs: Vec<&str> = queries.iter().map(String::as_str).collect();
    let results = linker
        .engine()
        .predict_batch(&query_refs, top_k)
        .context("Linking failed")?;

    let output: Vec<LinkOutput<'_>> = mentions
        .iter()
        .zip(results)
        .map(|(mention, candidates)| LinkOutput {
            mention: mention.as_str(),
            candidates,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn fit_sparse(dictionary: &Path, output: &Path) -> Result<()> {
    let dict = Dictionary::load(dictionary)
        .with_context(|| format!("Failed to load dictionary {}", dictionary.display()))?;
    let encoder = CharNgramEncoder::fit(&dict.names());
    encoder
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        features = encoder.vocabulary().features.len(),
        output = %output.display(),
        "Sparse vocabulary written"
    );
    Ok(())
}

fn inspect_cache(config: &LinkerConfig, dictionary: &Path) -> Result<()> {
    let kind = config.strategy_kind()?;
    let model = config.resolved_model_name()?;
    let cache = DictionaryCache::with_options(&config.cache_root, config.cache_options());
    let path = cache.cache_path(dictionary, &model, kind, config.mean_centering)?;

    match DictionaryCache::load(&path)? {
        Some(entry) => {
            println!("{}", path.display());
            println!("{}", entry.stats());
        }
        None => println!("No cache at {}", path.display()),
    }
    Ok(())
}
