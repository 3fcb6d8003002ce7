//! Error types for the concept linker
//!
//! Every variant is fatal at the point of detection and propagates to the
//! caller. The only local recovery in the crate is the cache-miss branch of
//! [`crate::cache::DictionaryCache`], which is scoped to "file absent".

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LinkerError>;

/// Main error type for dictionary loading, scoring and retrieval
#[derive(Error, Debug)]
pub enum LinkerError {
    #[error("Failed to read dictionary {path}: {source}")]
    DictionaryLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dictionary line {line} in {path}: expected 'CUI||name', got '{content}'")]
    DictionaryFormat {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid top-k {k}: must be in 1..={available}")]
    InvalidK { k: usize, available: usize },

    #[error("Unsupported retrieval strategy '{0}' (expected 'biosyn' or 'sapbert')")]
    UnsupportedStrategy(String),

    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Encoder failure: {0}")]
    Encoder(String),

    #[error("Dictionary cache {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("Failed to persist dictionary cache {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<candle_core::Error> for LinkerError {
    fn from(error: candle_core::Error) -> Self {
        LinkerError::Encoder(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_k_message() {
        let err = LinkerError::InvalidK { k: 0, available: 3 };
        assert_eq!(err.to_string(), "Invalid top-k 0: must be in 1..=3");
    }

    #[test]
    fn test_format_error_carries_line() {
        let err = LinkerError::DictionaryFormat {
            path: PathBuf::from("dict.txt"),
            line: 7,
            content: "C1 flu".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("C1 flu"));
    }
}
