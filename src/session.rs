//! Mention-level linking over annotated text
//!
//! A caller hands over text units whose mentions were found by an upstream
//! tagger. For every mention of the requested category the session
//! normalizes the surface text, retrieves the top-k concepts and appends
//! them to the mention as [`LinkedConcept`] annotations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::RetrievalEngine;
use crate::error::{LinkerError, Result};
use crate::normalize::TextNormalizer;

/// Suffix of the label type attached to linked mentions
pub const LABEL_TYPE_SUFFIX: &str = "_nen";

/// A unit of text (sentence, paragraph) with its tagged mentions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub text: String,
    pub mentions: Vec<Mention>,
}

impl TextUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mentions: Vec::new(),
        }
    }

    /// Tag the byte span `start..end` of the text as a mention of `category`
    ///
    /// Returns `None` if the span is out of bounds or not on char boundaries.
    pub fn add_mention(
        &mut self,
        start: usize,
        end: usize,
        category: &str,
    ) -> Option<&mut Mention> {
        let text = self.text.get(start..end)?.to_string();
        self.mentions.push(Mention {
            start,
            end,
            text,
            category: category.to_string(),
            links: Vec::new(),
        });
        self.mentions.last_mut()
    }
}

/// A tagged span of a [`TextUnit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Tagger label, e.g. `diseases`
    pub category: String,
    /// Linked concepts, best first
    pub links: Vec<LinkedConcept>,
}

/// One candidate concept attached to a mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedConcept {
    /// `<category>_nen`
    pub label_type: String,
    pub concept_id: String,
    pub concept_name: String,
    pub score: f64,
}

/// Links mentions of one category against a retrieval engine
pub struct LinkingSession<'a> {
    engine: &'a RetrievalEngine,
    normalizer: TextNormalizer,
}

impl<'a> LinkingSession<'a> {
    pub fn new(engine: &'a RetrievalEngine) -> Self {
        Self::with_normalizer(engine, TextNormalizer::default())
    }

    pub fn with_normalizer(engine: &'a RetrievalEngine, normalizer: TextNormalizer) -> Self {
        Self { engine, normalizer }
    }

    /// Attach the top `top_k` concepts to every `category` mention in `units`
    ///
    /// `top_k` is validated before anything is touched. Mentions of other
    /// categories are left alone. Empty input is a no-op.
    pub fn predict(&self, units: &mut [TextUnit], category: &str, top_k: usize) -> Result<()> {
        if top_k == 0 {
            return Err(LinkerError::InvalidK {
                k: top_k,
                available: self.engine.dictionary_size(),
            });
        }

        let normalized: Vec<String> = units
            .iter()
            .flat_map(|unit| unit.mentions.iter())
            .filter(|mention| mention.category == category)
            .map(|mention| self.normalizer.normalize(&mention.text))
            .collect();
        if normalized.is_empty() {
            return Ok(());
        }

        let queries: Vec<&str> = normalized.iter().map(String::as_str).collect();
        let results = self.engine.predict_batch(&queries, top_k)?;
        debug!(mentions = results.len(), category, top_k, "Linked mentions");

        let label_type = format!("{category}{LABEL_TYPE_SUFFIX}");
        let mut results = results.into_iter();
        for mention in units
            .iter_mut()
            .flat_map(|unit| unit.mentions.iter_mut())
            .filter(|mention| mention.category == category)
        {
            let Some(candidates) = results.next() else {
                break;
            };
            mention
                .links
                .extend(candidates.into_iter().map(|candidate| LinkedConcept {
                    label_type: label_type.clone(),
                    concept_id: candidate.id,
                    concept_name: candidate.name,
                    score: f64::from(candidate.score),
                }));
        }
        Ok(())
    }
}
