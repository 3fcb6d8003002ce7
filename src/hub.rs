//! Model file resolution
//!
//! A model is named either by a local directory or by a HuggingFace Hub
//! repository id. Hub downloads land in the HuggingFace cache
//! (`~/.cache/huggingface`) and are reused on later runs.

use std::path::{Path, PathBuf};

use hf_hub::{api::sync::Api, Repo, RepoType};
use tracing::debug;

use crate::error::{LinkerError, Result};

/// BioSyn checkpoints published under `dmis-lab/biosyn-<name>`
pub const BIOSYN_MODELS: &[&str] = &[
    "sapbert-bc5cdr-disease",
    "sapbert-ncbi-disease",
    "sapbert-bc5cdr-chemical",
    "biobert-bc5cdr-disease",
    "biobert-ncbi-disease",
    "biobert-bc5cdr-chemical",
];

/// Full SapBERT repository behind the `sapbert` shorthand
pub const SAPBERT_REPO: &str = "cambridgeltl/SapBERT-from-PubMedBERT-fulltext";

/// Expand BioSyn short names to their hub repository
pub fn resolve_biosyn_name(model_name: &str) -> String {
    if BIOSYN_MODELS.contains(&model_name) {
        format!("dmis-lab/biosyn-{model_name}")
    } else {
        model_name.to_string()
    }
}

/// Expand the `sapbert` shorthand to its hub repository
pub fn resolve_sapbert_name(model_name: &str) -> String {
    if model_name == "sapbert" {
        SAPBERT_REPO.to_string()
    } else {
        model_name.to_string()
    }
}

/// Locate `filename` in a local model directory or download it from the hub
pub fn model_file(model_name_or_path: &str, filename: &str) -> Result<PathBuf> {
    let local = Path::new(model_name_or_path);
    if local.is_dir() {
        let path = local.join(filename);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(LinkerError::EncoderUnavailable(format!(
                "{} not found in {}",
                filename,
                local.display()
            )))
        };
    }

    let api = Api::new().map_err(|e| {
        LinkerError::EncoderUnavailable(format!("Failed to create HuggingFace API client: {e}"))
    })?;
    let repo = api.repo(Repo::new(model_name_or_path.to_string(), RepoType::Model));
    let path = repo.get(filename).map_err(|e| {
        LinkerError::EncoderUnavailable(format!(
            "Failed to download {filename} from {model_name_or_path}: {e}"
        ))
    })?;
    debug!(file = filename, path = %path.display(), "Model file resolved");
    Ok(path)
}

/// First of `filenames` the model provides, in preference order
pub fn first_model_file(model_name_or_path: &str, filenames: &[&str]) -> Result<PathBuf> {
    let mut last_err = None;
    for filename in filenames {
        match model_file(model_name_or_path, filename) {
            Ok(path) => return Ok(path),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        LinkerError::EncoderUnavailable(format!("no candidate files for {model_name_or_path}"))
    }))
}

/// Last path segment of a model id, used in cache file names
pub fn short_model_name(model_name_or_path: &str) -> &str {
    model_name_or_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(model_name_or_path)
}
