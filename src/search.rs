//! Query handling over a loaded bundle
//!
//! A [`SearchHandler`] owns the index and its metadata. It only exists once
//! both have been loaded, so every request served through it sees a ready
//! index.

use popcorn_core::{
    l2_norm, AssetPaths, FlatIndex, FormatError, MetadataError, MetadataStore, MovieRecord,
    VectorIndex,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provision::{AssetProvisioner, ProvisionError};

pub const MAX_TOP_K: usize = 200;
pub const DEFAULT_TOP_K: usize = 50;

/// Per-query failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("topK must be between 1 and 200, got {0}")]
    TopKOutOfRange(i64),

    #[error("Invalid vector dim in meta.json")]
    InvalidDim,

    #[error("meta.json dim {meta} does not match index dimension {index}")]
    IndexDimMismatch { meta: usize, index: usize },

    #[error("vector must have length {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector contains non-finite values")]
    NonFinite,

    #[error("vector norm is 0")]
    ZeroNorm,
}

impl SearchError {
    /// Whether the request itself was at fault, as opposed to the loaded assets.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, Self::InvalidDim | Self::IndexDimMismatch { .. })
    }
}

/// Startup failures while building the handler
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Failed to read faiss.index: {0}")]
    Index(#[from] FormatError),

    #[error("Failed to read meta.json: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One result row: the record fields plus its raw index score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: MovieRecord,
    pub score: f64,
    pub similarity: f64,
}

pub struct SearchHandler {
    index: Box<dyn VectorIndex>,
    metadata: MetadataStore,
}

impl SearchHandler {
    /// Pair an index with its metadata. Row `i` of the index is `items[i]`;
    /// disagreements are logged, not rejected.
    pub fn new(index: Box<dyn VectorIndex>, metadata: MetadataStore) -> Self {
        if index.len() != metadata.len() {
            tracing::warn!(
                "Index holds {} vectors but meta.json has {} items; unmatched rows are dropped",
                index.len(),
                metadata.len()
            );
        }
        match metadata.dim() {
            Some(dim) if dim != index.dim() => tracing::warn!(
                "meta.json dim {} differs from index dimension {}",
                dim,
                index.dim()
            ),
            None => tracing::warn!("meta.json has no valid dim; every search will fail"),
            _ => {}
        }
        if !index.metric().higher_is_better() {
            tracing::warn!("Index uses L2 distance; scores are squared distances, lower is closer");
        }

        Self { index, metadata }
    }

    /// Load a bundle from disk.
    pub fn load(paths: &AssetPaths) -> Result<Self, LoadError> {
        let index = FlatIndex::load(&paths.index)?;
        let metadata = MetadataStore::load(&paths.metadata)?;

        tracing::info!(
            "Loaded {} vectors (dim {}, {:?}, {:.1} MB) and {} metadata items from {}",
            index.len(),
            index.dim(),
            index.metric(),
            index.memory_bytes() as f64 / (1024.0 * 1024.0),
            metadata.len(),
            paths.dir.display()
        );
        Ok(Self::new(Box::new(index), metadata))
    }

    /// Provision the assets, then load them off the async runtime.
    pub async fn build(provisioner: &AssetProvisioner) -> Result<Self, LoadError> {
        let paths = provisioner.ensure_available().await?.clone();
        tokio::task::spawn_blocking(move || Self::load(&paths)).await?
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Nearest records to `vector`, best first in the index's own order.
    ///
    /// The query is scaled to unit length before it reaches the index.
    pub fn search(&self, vector: &[f32], top_k: i64) -> Result<Vec<SearchHit>, SearchError> {
        let top_k = usize::try_from(top_k)
            .ok()
            .filter(|k| (1..=MAX_TOP_K).contains(k))
            .ok_or(SearchError::TopKOutOfRange(top_k))?;

        let dim = self.metadata.dim().ok_or(SearchError::InvalidDim)?;
        if dim != self.index.dim() {
            return Err(SearchError::IndexDimMismatch {
                meta: dim,
                index: self.index.dim(),
            });
        }
        if vector.len() != dim {
            return Err(SearchError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::NonFinite);
        }
        let norm = l2_norm(vector);
        if norm == 0.0 {
            return Err(SearchError::ZeroNorm);
        }
        let query: Vec<f32> = vector.iter().map(|&v| (v as f64 / norm) as f32).collect();

        let k = top_k.min(self.metadata.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let hits = self
            .index
            .search(&query, k)
            .into_iter()
            .filter_map(|neighbor| {
                let row = usize::try_from(neighbor.row).ok()?;
                let record = self.metadata.record(row)?;
                Some(SearchHit {
                    record,
                    score: neighbor.score as f64,
                    similarity: neighbor.score as f64,
                })
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use popcorn_core::{Metric, Neighbor, NO_RESULT};
    use serde_json::{json, Value};

    fn two_items() -> SearchHandler {
        let mut index = FlatIndex::new(2, Metric::InnerProduct);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        let metadata = MetadataStore::new(
            2,
            vec![
                json!({"imdbId": "tt1", "title": "A", "year": 2001, "productionCountry": "US"}),
                json!({"imdbId": "tt2", "title": "B", "year": 2002, "productionCountry": "FR"}),
            ],
        );
        SearchHandler::new(Box::new(index), metadata)
    }

    /// Returns a fixed answer regardless of the query.
    struct Scripted {
        dim: usize,
        answer: Vec<Neighbor>,
    }

    impl VectorIndex for Scripted {
        fn dim(&self) -> usize {
            self.dim
        }

        fn len(&self) -> usize {
            self.answer.len()
        }

        fn metric(&self) -> Metric {
            Metric::InnerProduct
        }

        fn search(&self, _query: &[f32], k: usize) -> Vec<Neighbor> {
            self.answer.iter().copied().take(k).collect()
        }
    }

    fn scripted(answer: Vec<Neighbor>, items: Vec<Value>) -> SearchHandler {
        SearchHandler::new(Box::new(Scripted { dim: 2, answer }), MetadataStore::new(2, items))
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let handler = two_items();
        let hits = handler.search(&[1.0, 0.0], 1).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.imdb_id, json!("tt1"));
        assert_eq!(hits[0].record.title, json!("A"));
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].similarity, 1.0);
    }

    #[test]
    fn test_top_k_is_capped_by_item_count() {
        let handler = two_items();
        let hits = handler.search(&[0.6, 0.8], 5).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.imdb_id, json!("tt2"));
        assert_eq!(hits[1].record.imdb_id, json!("tt1"));
    }

    #[test]
    fn test_query_is_normalized() {
        let handler = two_items();
        let hits = handler.search(&[10.0, 0.0], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vector_validation() {
        let handler = two_items();

        assert_eq!(
            handler.search(&[1.0, 0.0, 0.0], 1),
            Err(SearchError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(handler.search(&[f32::NAN, 1.0], 1), Err(SearchError::NonFinite));
        assert_eq!(
            handler.search(&[f32::INFINITY, 1.0], 1),
            Err(SearchError::NonFinite)
        );
        assert_eq!(handler.search(&[0.0, 0.0], 1), Err(SearchError::ZeroNorm));
        assert_eq!(
            SearchError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
            .to_string(),
            "vector must have length 2"
        );
    }

    #[test]
    fn test_top_k_bounds() {
        let handler = two_items();

        assert_eq!(handler.search(&[1.0, 0.0], 0), Err(SearchError::TopKOutOfRange(0)));
        assert_eq!(handler.search(&[1.0, 0.0], -3), Err(SearchError::TopKOutOfRange(-3)));
        assert_eq!(
            handler.search(&[1.0, 0.0], 201),
            Err(SearchError::TopKOutOfRange(201))
        );
        assert!(handler.search(&[1.0, 0.0], 200).is_ok());
    }

    #[test]
    fn test_invalid_meta_dim_is_a_server_error() {
        let index = FlatIndex::from_vectors(2, Metric::InnerProduct, vec![1.0, 0.0]).unwrap();
        let metadata = MetadataStore::from_slice(br#"{"dim": 0, "items": [{}]}"#).unwrap();
        let handler = SearchHandler::new(Box::new(index), metadata);

        let err = handler.search(&[1.0, 0.0], 1).unwrap_err();
        assert_eq!(err, SearchError::InvalidDim);
        assert!(!err.is_caller_error());
        assert_eq!(err.to_string(), "Invalid vector dim in meta.json");
    }

    #[test]
    fn test_meta_dim_disagreeing_with_index_is_rejected() {
        let index = FlatIndex::from_vectors(2, Metric::InnerProduct, vec![1.0, 0.0]).unwrap();
        let handler = SearchHandler::new(Box::new(index), MetadataStore::new(3, vec![json!({})]));

        let err = handler.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err, SearchError::IndexDimMismatch { meta: 3, index: 2 });
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_empty_metadata_returns_no_hits() {
        let handler = scripted(vec![Neighbor { score: 0.9, row: 0 }], vec![]);
        assert_eq!(handler.search(&[1.0, 0.0], 10).unwrap(), vec![]);
    }

    #[test]
    fn test_index_order_is_preserved() {
        let items = (0..4).map(|i| json!({"imdbId": format!("tt{i}")})).collect();
        let handler = scripted(
            vec![
                Neighbor { score: 0.2, row: 3 },
                Neighbor { score: 0.9, row: 0 },
                Neighbor { score: 0.5, row: 2 },
            ],
            items,
        );

        let ids: Vec<Value> = handler
            .search(&[1.0, 1.0], 3)
            .unwrap()
            .into_iter()
            .map(|h| h.record.imdb_id)
            .collect();
        assert_eq!(ids, vec![json!("tt3"), json!("tt0"), json!("tt2")]);
    }

    #[test]
    fn test_sentinel_and_out_of_range_rows_are_skipped() {
        let items = vec![json!({"imdbId": "tt0"}), json!({"imdbId": "tt1"})];
        let handler = scripted(
            vec![
                Neighbor { score: 0.9, row: 1 },
                Neighbor { score: 0.8, row: NO_RESULT },
            ],
            items.clone(),
        );
        let hits = handler.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.imdb_id, json!("tt1"));

        let handler = scripted(
            vec![
                Neighbor { score: 0.9, row: 7 },
                Neighbor { score: 0.8, row: 0 },
            ],
            items,
        );
        let hits = handler.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.imdb_id, json!("tt0"));
    }

    #[test]
    fn test_non_object_item_yields_null_fields() {
        let handler = scripted(vec![Neighbor { score: 0.4, row: 0 }], vec![json!("junk")]);
        let hit = &handler.search(&[0.0, 1.0], 1).unwrap()[0];

        assert_eq!(
            serde_json::to_value(hit).unwrap(),
            json!({
                "imdbId": null,
                "title": null,
                "year": null,
                "productionCountry": null,
                "score": 0.4f32 as f64,
                "similarity": 0.4f32 as f64
            })
        );
    }
}
