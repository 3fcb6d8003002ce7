//! Concept dictionary loading
//!
//! A dictionary file is UTF-8 text with one `CUI||concept name` pair per
//! non-blank line. Line order defines entry order, and entry order is the
//! join key to the rows of every embedding matrix built over the dictionary.
//!
//! Parsing is strict: a malformed line fails the whole load. A silently
//! skipped line would shift every following row and attach embeddings to the
//! wrong concept ids.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LinkerError, Result};

/// Separator between concept id and concept name
pub const FIELD_SEPARATOR: &str = "||";

/// One dictionary row: a concept name and the id it maps to
///
/// Names are not unique; the same name may appear under several ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptEntry {
    /// Lowercased concept name
    pub name: String,
    /// Concept identifier (e.g. `MESH:D007251`)
    pub id: String,
}

impl ConceptEntry {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Ordered, index-addressable concept dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    entries: Vec<ConceptEntry>,
}

impl Dictionary {
    pub fn from_entries(entries: Vec<ConceptEntry>) -> Self {
        Self { entries }
    }

    /// Read and parse a dictionary file
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading dictionary");
        let content = std::fs::read_to_string(path).map_err(|source| {
            LinkerError::DictionaryLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let dictionary = Self::parse(&content, path)?;
        info!(entries = dictionary.len(), "Dictionary loaded");
        Ok(dictionary)
    }

    /// Parse dictionary text; `origin` is only used in error messages
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for (line_no, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            entries.push(parse_line(line).ok_or_else(|| LinkerError::DictionaryFormat {
                path: PathBuf::from(origin),
                line: line_no + 1,
                content: line.to_string(),
            })?);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConceptEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ConceptEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConceptEntry> {
        self.entries.iter()
    }

    /// Concept names in row order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

/// `CUI||name` with exactly one separator and a non-empty id
fn parse_line(line: &str) -> Option<ConceptEntry> {
    let (id, name) = line.split_once(FIELD_SEPARATOR)?;
    if name.contains(FIELD_SEPARATOR) {
        return None;
    }
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    Some(ConceptEntry::new(name.trim().to_lowercase(), id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Dictionary> {
        Dictionary::parse(content, Path::new("test.txt"))
    }

    #[test]
    fn test_parse_lowercases_names() {
        let dict = parse("C1||Flu\nC2||Influenza\n").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(0), Some(&ConceptEntry::new("flu", "C1")));
        assert_eq!(dict.names(), vec!["flu", "influenza"]);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let dict = parse("\nC1||flu\n\n   \nC3||cold\n").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(1).unwrap().id, "C3");
    }

    #[test]
    fn test_duplicate_names_kept() {
        let dict = parse("C1||cold\nC2||cold\n").unwrap();
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_missing_separator_fails() {
        let err = parse("C1||flu\nC2 influenza\n").unwrap_err();
        match err {
            LinkerError::DictionaryFormat { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "C2 influenza");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_extra_separator_fails() {
        assert!(matches!(
            parse("C1||flu||extra"),
            Err(LinkerError::DictionaryFormat { .. })
        ));
    }

    #[test]
    fn test_empty_id_fails() {
        assert!(matches!(
            parse("||flu"),
            Err(LinkerError::DictionaryFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Dictionary::load(Path::new("/nonexistent/dict.txt")).unwrap_err();
        assert!(matches!(err, LinkerError::DictionaryLoad { .. }));
    }
}
