//! Persistent dictionary embedding cache
//!
//! Encoding a large dictionary is the slowest step of loading a linker, so
//! the loaded dictionary and its embeddings are stored as one bincode file
//! per (encoder, strategy, dictionary) triple:
//!
//! ```text
//! <root>/datasets/cached_<model>_<stem>_<biosyn|sapbert>[_centered][_<fingerprint>].bin
//! ```
//!
//! The default key is name-based: editing a dictionary file in place or
//! retraining a model under the same name serves the stale entry. The opt-in
//! fingerprint mode adds a content hash of the dictionary bytes and the
//! encoder identifier to the file name.
//!
//! A missing file is rebuilt. A file that exists but cannot be decoded, or
//! whose embeddings do not fit the requesting strategy, is an error, never a
//! silent rebuild.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::dictionary::Dictionary;
use crate::error::{LinkerError, Result};
use crate::hub::short_model_name;
use crate::matrix::{Matrix, SparseMatrix};
use crate::strategy::{Batching, Embeddings, RetrievalStrategy, StrategyKind};

/// Sub-directory of the cache root holding dictionary caches
pub const DATASETS_DIR: &str = "datasets";

/// Hex characters of the content fingerprint kept in file names
pub const FINGERPRINT_LEN: usize = 16;

/// A loaded dictionary with embeddings for every entry
///
/// Row `i` of every embedding matrix belongs to dictionary entry `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryCacheEntry {
    dictionary: Dictionary,
    embeddings: Embeddings,
    /// Column mean of the dense embeddings before centering, if centered
    mean_vector: Option<Vec<f32>>,
}

impl DictionaryCacheEntry {
    pub fn new(
        dictionary: Dictionary,
        embeddings: Embeddings,
        mean_vector: Option<Vec<f32>>,
    ) -> Result<Self> {
        let entry = Self {
            dictionary,
            embeddings,
            mean_vector,
        };
        entry.check_alignment()?;
        Ok(entry)
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn embeddings(&self) -> &Embeddings {
        &self.embeddings
    }

    pub fn dense_embeddings(&self) -> &Matrix {
        &self.embeddings.dense
    }

    pub fn sparse_embeddings(&self) -> Option<&SparseMatrix> {
        self.embeddings.sparse.as_ref()
    }

    pub fn mean_vector(&self) -> Option<&[f32]> {
        self.mean_vector.as_deref()
    }

    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionary.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.dictionary.len(),
            dense_dimension: self.embeddings.dense.cols(),
            sparse_dimension: self.embeddings.sparse.as_ref().map(|s| s.cols()),
            sparse_nnz: self.embeddings.sparse.as_ref().map(|s| s.nnz()),
            mean_centered: self.mean_vector.is_some(),
        }
    }

    fn check_alignment(&self) -> Result<()> {
        let sparse_ok = self
            .embeddings
            .sparse
            .as_ref()
            .map_or(true, |s| s.is_well_formed());
        if !self.embeddings.dense.is_well_formed() || !sparse_ok {
            return Err(LinkerError::CacheCorrupt {
                path: PathBuf::new(),
                reason: "embedding buffers do not match their shapes".to_string(),
            });
        }

        let rows = self.dictionary.len();
        let dense = self.embeddings.dense.shape();
        if dense.0 != rows {
            return Err(LinkerError::ShapeMismatch {
                expected: (rows, dense.1),
                found: dense,
            });
        }
        if let Some(sparse) = &self.embeddings.sparse {
            if sparse.rows() != rows {
                return Err(LinkerError::ShapeMismatch {
                    expected: (rows, sparse.cols()),
                    found: sparse.shape(),
                });
            }
        }
        if let Some(mean) = &self.mean_vector {
            if mean.len() != dense.1 {
                return Err(LinkerError::ShapeMismatch {
                    expected: (1, dense.1),
                    found: (1, mean.len()),
                });
            }
        }
        Ok(())
    }

    /// Check that the entry carries the embeddings `strategy` scores against
    fn check_fits(&self, strategy: &dyn RetrievalStrategy) -> std::result::Result<(), String> {
        let dense = self.embeddings.dense.cols();
        let expected_dense = strategy.dense_encoder().dimension();
        if dense != expected_dense {
            return Err(format!(
                "dense width {dense} does not match encoder width {expected_dense}"
            ));
        }
        match (&self.embeddings.sparse, strategy.sparse_encoder()) {
            (None, None) => Ok(()),
            (Some(sparse), Some(encoder)) if sparse.cols() == encoder.dimension() => Ok(()),
            (Some(sparse), Some(encoder)) => Err(format!(
                "sparse width {} does not match vocabulary width {}",
                sparse.cols(),
                encoder.dimension()
            )),
            (None, Some(_)) => Err(format!(
                "{} strategy needs sparse embeddings, entry has none",
                strategy.kind()
            )),
            (Some(_), None) => Err(format!(
                "{} strategy is dense only, entry has sparse embeddings",
                strategy.kind()
            )),
        }
    }
}

/// Summary of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub dense_dimension: usize,
    pub sparse_dimension: Option<usize>,
    pub sparse_nnz: Option<usize>,
    pub mean_centered: bool,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, dense dim {}",
            self.entries, self.dense_dimension
        )?;
        if let (Some(dim), Some(nnz)) = (self.sparse_dimension, self.sparse_nnz) {
            write!(f, ", sparse dim {dim} ({nnz} non-zeros)")?;
        }
        if self.mean_centered {
            write!(f, ", mean-centered")?;
        }
        Ok(())
    }
}

/// Options controlling how cache entries are keyed and built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheOptions {
    pub batching: Batching,
    /// Add a content hash to cache file names
    pub fingerprint: bool,
}

/// File-backed cache of [`DictionaryCacheEntry`] values
#[derive(Debug, Clone)]
pub struct DictionaryCache {
    root: PathBuf,
    options: CacheOptions,
}

impl DictionaryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, CacheOptions::default())
    }

    pub fn with_options(root: impl Into<PathBuf>, options: CacheOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file for a dictionary embedded by `encoder_identifier` under `kind`
    pub fn cache_path(
        &self,
        dictionary_path: &Path,
        encoder_identifier: &str,
        kind: StrategyKind,
        mean_centering: bool,
    ) -> Result<PathBuf> {
        let stem = dictionary_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dictionary".to_string());
        let mut name = format!(
            "cached_{}_{}_{}",
            short_model_name(encoder_identifier),
            stem,
            kind
        );
        if mean_centering {
            name.push_str("_centered");
        }
        if self.options.fingerprint {
            name.push('_');
            name.push_str(&fingerprint(dictionary_path, encoder_identifier)?);
        }
        name.push_str(".bin");
        Ok(self.root.join(DATASETS_DIR).join(name))
    }

    /// Load the cached entry for `dictionary_path`, building and persisting
    /// it on a miss
    pub fn get_or_build(
        &self,
        dictionary_path: &Path,
        strategy: &dyn RetrievalStrategy,
        mean_centering: bool,
    ) -> Result<DictionaryCacheEntry> {
        let path = self.cache_path(
            dictionary_path,
            strategy.identifier(),
            strategy.kind(),
            mean_centering,
        )?;

        if let Some(entry) = Self::load(&path)? {
            entry
                .check_fits(strategy)
                .map_err(|reason| LinkerError::CacheCorrupt {
                    path: path.clone(),
                    reason,
                })?;
            info!(path = %path.display(), entries = entry.len(), "Dictionary cache hit");
            return Ok(entry);
        }

        info!(path = %path.display(), "Dictionary cache miss, embedding dictionary");
        let dictionary = Dictionary::load(dictionary_path)?;
        if dictionary.len() > 100_000 {
            warn!(
                entries = dictionary.len(),
                "Embedding a large dictionary, this may take a while"
            );
        }
        let entry = build_entry(dictionary, strategy, self.options.batching, mean_centering)?;
        Self::persist(&path, &entry)?;
        Ok(entry)
    }

    /// Read a cache file; `Ok(None)` when it does not exist
    pub fn load(path: &Path) -> Result<Option<DictionaryCacheEntry>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LinkerError::CacheCorrupt {
                    path: path.to_path_buf(),
                    reason: format!("unreadable: {e}"),
                })
            }
        };

        let entry: DictionaryCacheEntry =
            bincode::deserialize(&bytes).map_err(|e| LinkerError::CacheCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        entry.check_alignment().map_err(|e| {
            let reason = match e {
                LinkerError::CacheCorrupt { reason, .. } => reason,
                other => other.to_string(),
            };
            LinkerError::CacheCorrupt {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        Ok(Some(entry))
    }

    /// Write `entry` to `path` through a temp file in the same directory
    pub fn persist(path: &Path, entry: &DictionaryCacheEntry) -> Result<()> {
        let write_err = |source: std::io::Error| LinkerError::CacheWrite {
            path: path.to_path_buf(),
            source,
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            bincode::serialize_into(&mut writer, entry).map_err(|e| {
                write_err(std::io::Error::new(ErrorKind::Other, e.to_string()))
            })?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        info!(path = %path.display(), entries = entry.len(), "Dictionary cache persisted");
        Ok(())
    }
}

/// Embed every dictionary name and assemble a cache entry
///
/// With `mean_centering`, the column mean of the dense embeddings is
/// subtracted from every row and kept so queries can be centered the same
/// way.
pub fn build_entry(
    dictionary: Dictionary,
    strategy: &dyn RetrievalStrategy,
    batching: Batching,
    mean_centering: bool,
) -> Result<DictionaryCacheEntry> {
    let names = dictionary.names();
    let mut embeddings = strategy.embed(&names, batching)?;
    debug!(
        rows = embeddings.rows(),
        dense_dim = embeddings.dense.cols(),
        sparse = embeddings.sparse.is_some(),
        "Dictionary embedded"
    );

    let mean_vector = if mean_centering {
        let mean = embeddings.dense.column_mean();
        embeddings.dense.subtract_row(&mean)?;
        Some(mean)
    } else {
        None
    };

    DictionaryCacheEntry::new(dictionary, embeddings, mean_vector)
}

/// First [`FINGERPRINT_LEN`] hex chars of `sha256(dictionary bytes ‖ encoder id)`
fn fingerprint(dictionary_path: &Path, encoder_identifier: &str) -> Result<String> {
    let mut file = File::open(dictionary_path).map_err(|source| LinkerError::DictionaryLoad {
        path: dictionary_path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| LinkerError::DictionaryLoad {
        path: dictionary_path.to_path_buf(),
        source,
    })?;
    hasher.update(encoder_identifier.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..FINGERPRINT_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::dictionary::ConceptEntry;
    use crate::encoder::testing::TableEncoder;
    use crate::encoder::DenseEncoder;
    use crate::fusion::DenseScoring;
    use crate::sparse::CharNgramEncoder;
    use crate::strategy::{DenseStrategy, HybridStrategy};

    struct CountingEncoder {
        inner: TableEncoder,
        calls: Arc<AtomicUsize>,
    }

    impl DenseEncoder for CountingEncoder {
        fn identifier(&self) -> &str {
            self.inner.identifier()
        }

        fn embed_dense(&self, texts: &[&str]) -> Result<Matrix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_dense(texts)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    fn strategy(calls: Arc<AtomicUsize>) -> DenseStrategy {
        let inner = TableEncoder::new(
            "org/table-model",
            &[
                ("flu", vec![1.0, 0.0]),
                ("influenza", vec![0.8, 0.2]),
                ("cold", vec![0.0, 1.0]),
            ],
        );
        DenseStrategy::new(
            Box::new(CountingEncoder { inner, calls }),
            DenseScoring::default(),
        )
    }

    fn write_dictionary(dir: &Path) -> PathBuf {
        let path = dir.join("diseases.txt");
        std::fs::write(&path, "C1||Flu\nC1||Influenza\nC2||Cold\n").unwrap();
        path
    }

    #[test]
    fn test_cache_path_layout() {
        let cache = DictionaryCache::new("/tmp/cache");
        let path = cache
            .cache_path(
                Path::new("/data/diseases.txt"),
                "org/table-model",
                StrategyKind::Dense,
                false,
            )
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/tmp/cache/datasets/cached_table-model_diseases_sapbert.bin")
        );

        let centered = cache
            .cache_path(
                Path::new("/data/diseases.txt"),
                "org/table-model",
                StrategyKind::Hybrid,
                true,
            )
            .unwrap();
        assert!(centered.ends_with("cached_table-model_diseases_biosyn_centered.bin"));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let cache = DictionaryCache::with_options(
            dir.path(),
            CacheOptions {
                fingerprint: true,
                ..Default::default()
            },
        );

        let before = cache.cache_path(&dict, "m", StrategyKind::Dense, false).unwrap();
        std::fs::write(&dict, "C9||other\n").unwrap();
        let after = cache.cache_path(&dict, "m", StrategyKind::Dense, false).unwrap();
        assert_ne!(before, after);

        let name = after.file_name().unwrap().to_string_lossy().into_owned();
        let hash = name
            .trim_end_matches(".bin")
            .rsplit('_')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(hash.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_hit_skips_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = strategy(calls.clone());
        let cache = DictionaryCache::new(dir.path().join("cache"));

        let first = cache.get_or_build(&dict, &strategy, false).unwrap();
        let after_build = calls.load(Ordering::SeqCst);
        assert!(after_build > 0);

        let second = cache.get_or_build(&dict, &strategy, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), after_build);
        assert_eq!(first, second);
        assert_eq!(second.dictionary().get(0).unwrap().name, "flu");
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let strategy = strategy(Arc::new(AtomicUsize::new(0)));
        let cache = DictionaryCache::new(dir.path().join("cache"));

        cache.get_or_build(&dict, &strategy, true).unwrap();
        let path = cache
            .cache_path(&dict, strategy.identifier(), strategy.kind(), true)
            .unwrap();
        let first = std::fs::read(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        cache.get_or_build(&dict, &strategy, true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_mean_centering_persists_mean() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let strategy = strategy(Arc::new(AtomicUsize::new(0)));
        let cache = DictionaryCache::new(dir.path().join("cache"));

        cache.get_or_build(&dict, &strategy, true).unwrap();
        let reloaded = cache.get_or_build(&dict, &strategy, true).unwrap();

        let mean = reloaded.mean_vector().unwrap();
        assert!((mean[0] - 0.6).abs() < 1e-6);
        assert!((mean[1] - 0.4).abs() < 1e-6);
        let centered = reloaded.dense_embeddings().column_mean();
        assert!(centered.iter().all(|x| x.abs() < 1e-6));
        assert!(reloaded.stats().mean_centered);
    }

    #[test]
    fn test_corrupt_cache_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let strategy = strategy(Arc::new(AtomicUsize::new(0)));
        let cache = DictionaryCache::new(dir.path().join("cache"));

        let path = cache
            .cache_path(&dict, strategy.identifier(), strategy.kind(), false)
            .unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a cache").unwrap();

        assert!(matches!(
            cache.get_or_build(&dict, &strategy, false),
            Err(LinkerError::CacheCorrupt { .. })
        ));
    }

    #[test]
    fn test_rows_align_with_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let strategy = strategy(Arc::new(AtomicUsize::new(0)));
        let entry = DictionaryCache::new(dir.path())
            .get_or_build(&dict, &strategy, false)
            .unwrap();

        assert_eq!(entry.len(), 3);
        assert_eq!(entry.dense_embeddings().rows(), 3);
        assert_eq!(entry.dense_embeddings().row(2), &[0.0, 1.0]);
        assert!(entry.sparse_embeddings().is_none());
        assert_eq!(entry.stats().to_string(), "3 entries, dense dim 2");
    }

    #[test]
    fn test_misaligned_entry_rejected() {
        let dictionary = Dictionary::from_entries(vec![ConceptEntry::new("flu", "C1")]);
        let embeddings = Embeddings {
            dense: Matrix::zeros(2, 2),
            sparse: None,
        };
        assert!(matches!(
            DictionaryCacheEntry::new(dictionary, embeddings, None),
            Err(LinkerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_entry_built_by_other_strategy_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let cache = DictionaryCache::new(dir.path().join("cache"));
        let dense = strategy(Arc::new(AtomicUsize::new(0)));
        let entry = cache.get_or_build(&dict, &dense, false).unwrap();

        let hybrid = HybridStrategy::new(
            Box::new(TableEncoder::new("org/table-model", &[("flu", vec![1.0, 0.0])])),
            Box::new(CharNgramEncoder::fit(&["flu", "influenza", "cold"])),
            1.0,
        );
        assert!(entry.check_fits(&hybrid).is_err());

        // separate keys: the hybrid build does not reuse the dense file
        let built = cache.get_or_build(&dict, &hybrid, false).unwrap();
        assert!(built.sparse_embeddings().is_some());
        assert_ne!(
            cache
                .cache_path(&dict, dense.identifier(), dense.kind(), false)
                .unwrap(),
            cache
                .cache_path(&dict, hybrid.identifier(), hybrid.kind(), false)
                .unwrap()
        );
    }

    #[test]
    fn test_mismatched_entry_at_strategy_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_dictionary(dir.path());
        let cache = DictionaryCache::new(dir.path().join("cache"));
        let dense = strategy(Arc::new(AtomicUsize::new(0)));
        let entry = build_entry(
            Dictionary::load(&dict).unwrap(),
            &dense,
            Batching::default(),
            false,
        )
        .unwrap();

        let hybrid = HybridStrategy::new(
            Box::new(TableEncoder::new("org/table-model", &[("flu", vec![1.0, 0.0])])),
            Box::new(CharNgramEncoder::fit(&["flu", "influenza", "cold"])),
            1.0,
        );
        let path = cache
            .cache_path(&dict, hybrid.identifier(), hybrid.kind(), false)
            .unwrap();
        DictionaryCache::persist(&path, &entry).unwrap();

        match cache.get_or_build(&dict, &hybrid, false) {
            Err(LinkerError::CacheCorrupt { reason, .. }) => {
                assert!(reason.contains("needs sparse embeddings"))
            }
            other => panic!("expected CacheCorrupt, got {other:?}"),
        }
    }
}
