//! BERT dense encoder using Candle
//!
//! Loads a BERT-family checkpoint (BioSyn, SapBERT, PubMedBERT...) from a
//! local directory or the HuggingFace Hub and produces one vector per input
//! text. Inputs are padded and truncated to a fixed `max_length`, matching
//! how the checkpoints were trained for short concept names.
//!
//! Unlike sentence-similarity embedders the output is NOT L2 normalized:
//! hybrid scoring adds raw dense dot products to weighted sparse scores, and
//! the learned sparse weight is calibrated against unnormalized vectors.

use std::path::Path;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use serde::{Deserialize, Serialize};
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::encoder::DenseEncoder;
use crate::error::{LinkerError, Result};
use crate::hub::{first_model_file, model_file};
use crate::matrix::Matrix;

/// Default token length; concept names are short
pub const DEFAULT_MAX_LENGTH: usize = 25;

/// Tokenizer files tried in order; `vocab.txt` gets a standard BERT pipeline
pub const TOKENIZER_FILES: &[&str] = &["tokenizer.json", "vocab.txt"];

/// Weight files tried in order
pub const WEIGHT_FILES: &[&str] = &["model.safetensors", "pytorch_model.bin"];

/// How token states are pooled into one vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// `[CLS]` token state
    #[default]
    Cls,
    /// Mean over non-padding tokens
    Mean,
    /// Mean over all positions, padding included
    #[serde(rename = "mean_all_tok")]
    MeanAllTokens,
}

impl FromStr for Aggregation {
    type Err = LinkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cls" => Ok(Aggregation::Cls),
            "mean" => Ok(Aggregation::Mean),
            "mean_all_tok" => Ok(Aggregation::MeanAllTokens),
            other => Err(LinkerError::Config(format!(
                "unknown aggregation '{other}' (expected cls, mean or mean_all_tok)"
            ))),
        }
    }
}

/// BERT encoder producing pooled token states
pub struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    identifier: String,
    hidden_size: usize,
    aggregation: Aggregation,
}

impl BertEncoder {
    /// Load a checkpoint, downloading it if needed
    pub fn load(
        model_name_or_path: &str,
        max_length: usize,
        aggregation: Aggregation,
    ) -> Result<Self> {
        info!(model = model_name_or_path, "Loading dense encoder");

        let device = Device::Cpu;

        let config_path = model_file(model_name_or_path, "config.json")?;
        let tokenizer_path = first_model_file(model_name_or_path, TOKENIZER_FILES)?;
        let weights_path = first_model_file(model_name_or_path, WEIGHT_FILES)?;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).map_err(|e| {
                LinkerError::EncoderUnavailable(format!("Failed to read config.json: {e}"))
            })?,
        )
        .map_err(|e| LinkerError::EncoderUnavailable(format!("Failed to parse config.json: {e}")))?;

        debug!(hidden_size = config.hidden_size, "Model config loaded");

        let mut tokenizer = load_tokenizer(&tokenizer_path)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| {
                LinkerError::EncoderUnavailable(format!("Failed to configure truncation: {e}"))
            })?;

        let weights_err = |e: candle_core::Error| {
            LinkerError::EncoderUnavailable(format!("Failed to load model weights: {e}"))
        };
        let vb = if weights_path.extension().is_some_and(|ext| ext == "bin") {
            debug!(path = %weights_path.display(), "Loading PyTorch checkpoint");
            VarBuilder::from_pth(&weights_path, DTYPE, &device).map_err(weights_err)?
        } else {
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                    .map_err(weights_err)?
            }
        };
        let model = BertModel::load(vb, &config).map_err(|e| {
            LinkerError::EncoderUnavailable(format!("Failed to build BERT model: {e}"))
        })?;

        info!(model = model_name_or_path, ?aggregation, "Dense encoder loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            identifier: model_name_or_path.to_string(),
            hidden_size: config.hidden_size,
            aggregation,
        })
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn forward_batch(&self, texts: &[&str]) -> Result<Matrix> {
        if texts.is_empty() {
            return Ok(Matrix::zeros(0, self.hidden_size));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| LinkerError::Encoder(format!("Tokenization failed: {e}")))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_input_ids = Vec::with_capacity(texts.len() * seq_len);
        let mut all_attention_mask = Vec::with_capacity(texts.len() * seq_len);
        let mut all_token_type_ids = Vec::with_capacity(texts.len() * seq_len);

        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut attention = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();

            ids.resize(seq_len, 0);
            attention.resize(seq_len, 0);
            type_ids.resize(seq_len, 0);

            all_input_ids.extend(ids);
            all_attention_mask.extend(attention);
            all_token_type_ids.extend(type_ids);
        }

        let batch_size = texts.len();
        let input_ids = Tensor::from_vec(all_input_ids, (batch_size, seq_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(all_attention_mask, (batch_size, seq_len), &self.device)?;
        let token_type_ids =
            Tensor::from_vec(all_token_type_ids, (batch_size, seq_len), &self.device)?;

        // (batch_size, seq_len, hidden_size)
        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = match self.aggregation {
            Aggregation::Cls => output.narrow(1, 0, 1)?.squeeze(1)?,
            Aggregation::MeanAllTokens => output.mean(1)?,
            Aggregation::Mean => {
                let mask = attention_mask.to_dtype(DType::F32)?;
                let summed = output.broadcast_mul(&mask.unsqueeze(2)?)?.sum(1)?;
                let counts = mask.sum_keepdim(1)?.clamp(1e-9, f64::MAX)?;
                summed.broadcast_div(&counts)?
            }
        };

        Matrix::from_rows(pooled.to_vec2::<f32>()?)
    }
}

/// Load `tokenizer.json`, or build an uncased WordPiece tokenizer from `vocab.txt`
fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let unavailable = |e: tokenizers::Error| {
        LinkerError::EncoderUnavailable(format!("Failed to load tokenizer: {e}"))
    };
    if path.file_name().is_some_and(|name| name != "vocab.txt") {
        return Tokenizer::from_file(path).map_err(unavailable);
    }

    let vocab = path.to_str().ok_or_else(|| {
        LinkerError::EncoderUnavailable(format!("Invalid tokenizer path {}", path.display()))
    })?;
    let model = WordPiece::from_file(vocab).build().map_err(unavailable)?;
    let mut tokenizer = Tokenizer::new(model);
    let special = |token: &str| {
        tokenizer
            .token_to_id(token)
            .map(|id| (token.to_string(), id))
            .ok_or_else(|| {
                LinkerError::EncoderUnavailable(format!("{token} missing from {}", path.display()))
            })
    };
    let (sep, cls) = (special("[SEP]")?, special("[CLS]")?);

    tokenizer.with_normalizer(Some(BertNormalizer::default()));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
    tokenizer.with_post_processor(Some(BertProcessing::new(sep, cls)));
    debug!(vocab = tokenizer.get_vocab_size(false), "WordPiece tokenizer built");
    Ok(tokenizer)
}

impl DenseEncoder for BertEncoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn embed_dense(&self, texts: &[&str]) -> Result<Matrix> {
        self.forward_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.hidden_size
    }
}
