//! Paired index + metadata assets
//!
//! A bundle is the directory the service serves from: `faiss.index` and
//! `meta.json`, where index row `i` describes `items[i]`. [`BundleWriter`]
//! produces both files from one stream of `(vector, record)` pairs so their
//! order cannot drift apart.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::faiss::{FlatIndexWriter, FormatError, Metric};
use crate::metadata::{MetadataError, MetadataStore, META_FILE};
use crate::simd::l2_normalized;

pub const INDEX_FILE: &str = "faiss.index";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Index format error: {0}")]
    Format(#[from] FormatError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector for item {row} is invalid: {reason}")]
    InvalidVector { row: usize, reason: String },
}

/// Locations of the two asset files inside a bundle directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    pub dir: PathBuf,
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl AssetPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            index: dir.join(INDEX_FILE),
            metadata: dir.join(META_FILE),
            dir,
        }
    }

    /// Both files present. Contents are not inspected.
    pub fn is_complete(&self) -> bool {
        self.index.is_file() && self.metadata.is_file()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleSummary {
    pub dim: usize,
    pub count: usize,
    pub metric: Metric,
}

/// Streams `(vector, record)` pairs into a new bundle directory
pub struct BundleWriter {
    paths: AssetPaths,
    tmp_index: PathBuf,
    index: FlatIndexWriter,
    items: Vec<Value>,
    dim: usize,
    metric: Metric,
}

impl BundleWriter {
    pub fn create(dir: impl AsRef<Path>, dim: usize, metric: Metric) -> Result<Self, BundleError> {
        std::fs::create_dir_all(dir.as_ref())?;
        let paths = AssetPaths::in_dir(dir.as_ref());
        let tmp_index = paths.index.with_extension("index.tmp");
        let index = FlatIndexWriter::new(&tmp_index, dim, metric)?;

        Ok(Self {
            paths,
            tmp_index,
            index,
            items: Vec::new(),
            dim,
            metric,
        })
    }

    /// Append one row. Vectors for inner-product bundles are stored at unit
    /// length so raw scores are cosine similarities.
    pub fn push(&mut self, vector: &[f32], record: Value) -> Result<(), BundleError> {
        let row = self.items.len();
        if vector.len() != self.dim {
            return Err(BundleError::InvalidVector {
                row,
                reason: format!("length {} but bundle dimension is {}", vector.len(), self.dim),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(BundleError::InvalidVector {
                row,
                reason: "contains non-finite values".into(),
            });
        }

        match self.metric {
            Metric::InnerProduct => {
                let unit = l2_normalized(vector).ok_or_else(|| BundleError::InvalidVector {
                    row,
                    reason: "norm is 0".into(),
                })?;
                self.index.write_vector(&unit)?;
            }
            Metric::L2 => self.index.write_vector(vector)?,
        }
        self.items.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finalize the index, then write metadata. Each file is renamed into
    /// place only after it is complete.
    pub fn finish(self) -> Result<BundleSummary, BundleError> {
        let count = self.index.finish()?;
        std::fs::rename(&self.tmp_index, &self.paths.index)?;

        MetadataStore::new(self.dim, self.items).save(&self.paths.metadata)?;

        Ok(BundleSummary {
            dim: self.dim,
            count,
            metric: self.metric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FlatIndex, VectorIndex};
    use crate::simd::is_normalized;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_bundle_rows_stay_paired() {
        let dir = tempdir().unwrap();

        let mut writer = BundleWriter::create(dir.path(), 2, Metric::InnerProduct).unwrap();
        writer.push(&[3.0, 4.0], json!({"imdbId": "tt1"})).unwrap();
        writer.push(&[0.0, 2.0], json!({"imdbId": "tt2"})).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.count, 2);

        let paths = AssetPaths::in_dir(dir.path());
        assert!(paths.is_complete());

        let index = FlatIndex::load(&paths.index).unwrap();
        let meta = MetadataStore::load(&paths.metadata).unwrap();
        assert_eq!(index.len(), meta.len());
        assert_eq!(meta.dim(), Some(2));
        assert!(is_normalized(index.vector(0).unwrap(), 1e-5));

        let top = index.search(&[0.0, 1.0], 1)[0];
        assert_eq!(meta.record(top.row as usize).unwrap().imdb_id, json!("tt2"));
    }

    #[test]
    fn test_rejects_zero_vector_for_inner_product() {
        let dir = tempdir().unwrap();
        let mut writer = BundleWriter::create(dir.path(), 2, Metric::InnerProduct).unwrap();

        let err = writer.push(&[0.0, 0.0], json!({})).unwrap_err();
        assert!(matches!(err, BundleError::InvalidVector { row: 0, .. }));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_rejects_wrong_length_and_nan() {
        let dir = tempdir().unwrap();
        let mut writer = BundleWriter::create(dir.path(), 3, Metric::L2).unwrap();

        assert!(writer.push(&[1.0, 2.0], json!({})).is_err());
        assert!(writer.push(&[1.0, f32::NAN, 0.0], json!({})).is_err());
        writer.push(&[0.0, 0.0, 0.0], json!({})).unwrap();
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_incomplete_dir_is_not_ready() {
        let dir = tempdir().unwrap();
        let paths = AssetPaths::in_dir(dir.path());
        std::fs::write(&paths.metadata, b"{}").unwrap();

        assert!(!paths.is_complete());
    }
}
