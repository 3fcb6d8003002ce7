//! Mention text normalization
//!
//! Maps raw mention text to the canonical form used for retrieval:
//! - Optional Unicode NFKC fold
//! - Lowercase conversion
//! - ASCII punctuation and whitespace runs collapsed to a single space
//! - Leading/trailing whitespace trimmed

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// ASCII punctuation characters treated as separators
pub const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

static DEFAULT_NORMALIZER: Lazy<TextNormalizer> = Lazy::new(TextNormalizer::default);

/// Normalize a mention with the default settings
///
/// # Examples
///
/// ```
/// use concept_linker::normalize::normalize_mention;
///
/// assert_eq!(normalize_mention("The  Flu!"), "the flu");
/// assert_eq!(normalize_mention("Hodgkin's-Disease"), "hodgkin s disease");
/// ```
pub fn normalize_mention(text: &str) -> String {
    DEFAULT_NORMALIZER.normalize(text)
}

/// Configurable mention normalizer
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    lowercase: bool,
    remove_punctuation: bool,
    unicode_fold: bool,
    separators: Regex,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::with_ignored_punctuation("")
    }
}

impl TextNormalizer {
    /// Normalizer that keeps the characters in `ignored` instead of
    /// treating them as separators (e.g. `"-"` to keep hyphenated names)
    pub fn with_ignored_punctuation(ignored: &str) -> Self {
        let punctuation: String = PUNCTUATION
            .chars()
            .filter(|c| !ignored.contains(*c))
            .collect();
        let pattern = format!(r"[\s{}]+", regex::escape(&punctuation));
        Self {
            lowercase: true,
            remove_punctuation: true,
            unicode_fold: false,
            // escaped ASCII punctuation inside a class always compiles
            separators: Regex::new(&pattern).unwrap_or_else(|_| whitespace_regex()),
        }
    }

    pub fn lowercase(mut self, enabled: bool) -> Self {
        self.lowercase = enabled;
        self
    }

    pub fn remove_punctuation(mut self, enabled: bool) -> Self {
        self.remove_punctuation = enabled;
        self
    }

    /// Apply NFKC before everything else (full-width forms become ASCII)
    pub fn unicode_fold(mut self, enabled: bool) -> Self {
        self.unicode_fold = enabled;
        self
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut text = if self.unicode_fold {
            text.nfkc().collect::<String>()
        } else {
            text.to_string()
        };

        if self.lowercase {
            text = text.to_lowercase();
        }

        if self.remove_punctuation {
            text = self
                .separators
                .split(&text)
                .filter(|token| !token.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
        }

        text.trim().to_string()
    }
}

fn whitespace_regex() -> Regex {
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
    WS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_and_strip() {
        assert_eq!(normalize_mention("  Influenza A  "), "influenza a");
    }

    #[test]
    fn test_punctuation_collapsed() {
        assert_eq!(normalize_mention("the flu!"), "the flu");
        assert_eq!(
            normalize_mention("breast/ovarian cancer"),
            "breast ovarian cancer"
        );
        assert_eq!(normalize_mention("(HbA1c)"), "hba1c");
    }

    #[test]
    fn test_whitespace_runs() {
        assert_eq!(normalize_mention("type\t2 \n diabetes"), "type 2 diabetes");
    }

    #[test]
    fn test_ignored_punctuation() {
        let normalizer = TextNormalizer::with_ignored_punctuation("-'");
        assert_eq!(
            normalizer.normalize("Hodgkin's Non-Hodgkin"),
            "hodgkin's non-hodgkin"
        );
    }

    #[test]
    fn test_punctuation_removal_disabled() {
        let normalizer = TextNormalizer::default().remove_punctuation(false);
        assert_eq!(normalizer.normalize(" A-B "), "a-b");
    }

    #[test]
    fn test_unicode_fold() {
        let normalizer = TextNormalizer::default().unicode_fold(true);
        assert_eq!(normalizer.normalize("ＡＳＰＩＲＩＮ"), "aspirin");
        // diacritics are kept; NFKC does not strip them
        assert_eq!(normalizer.normalize("Ménière"), "ménière");
    }

    #[test]
    fn test_only_punctuation() {
        assert_eq!(normalize_mention("?!"), "");
    }
}
