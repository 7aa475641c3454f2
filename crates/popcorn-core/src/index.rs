//! Exact k-nearest-neighbor search over a flat index
//!
//! `FlatIndex` keeps every vector in one contiguous row-major buffer and
//! scores them all per query. The scan is split into row blocks with rayon;
//! each block keeps a bounded heap of its best `k` rows and the heaps are
//! merged at the end.
//!
//! Results follow FAISS conventions: inner-product indexes rank by descending
//! score, L2 indexes by ascending squared distance, and when fewer than `k`
//! rows exist the tail is padded with [`NO_RESULT`] rows.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use rayon::prelude::*;

use crate::faiss::{read_flat_file, FlatIndexWriter, FormatError, Metric};
use crate::simd::{dot_product, l2_distance_squared};

/// Row id FAISS reports for an unfilled result slot.
pub const NO_RESULT: i64 = -1;

/// Rows scored per rayon task.
const ROWS_PER_TASK: usize = 4096;

/// One raw hit as returned by an index: a score and the row it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub score: f32,
    pub row: i64,
}

/// Read-only nearest-neighbor index
///
/// Implementations return exactly `k` neighbors in their own ranking order,
/// using [`NO_RESULT`] rows for slots they cannot fill. Callers must pass a
/// query of length [`VectorIndex::dim`].
pub trait VectorIndex: Send + Sync {
    fn dim(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn metric(&self) -> Metric;

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;
}

/// Brute-force index over vectors held in memory
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            vectors: Vec::new(),
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vectors(
        dim: usize,
        metric: Metric,
        vectors: Vec<f32>,
    ) -> Result<Self, FormatError> {
        if dim == 0 {
            return Err(FormatError::InvalidHeader("dimension must be positive".into()));
        }
        if vectors.len() % dim != 0 {
            return Err(FormatError::InvalidHeader(format!(
                "{} values is not a multiple of dimension {}",
                vectors.len(),
                dim
            )));
        }
        Ok(Self {
            dim,
            metric,
            vectors,
        })
    }

    /// Load a FAISS flat index file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let (header, vectors) = read_flat_file(path)?;
        Self::from_vectors(header.dim, header.metric, vectors)
    }

    /// Persist as a FAISS flat index file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<usize, FormatError> {
        let mut writer = FlatIndexWriter::new(path, self.dim, self.metric)?;
        for row in self.vectors.chunks_exact(self.dim) {
            writer.write_vector(row)?;
        }
        writer.finish()
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), FormatError> {
        if vector.len() != self.dim {
            return Err(FormatError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.vectors.get(start..start + self.dim)
    }

    pub fn memory_bytes(&self) -> usize {
        self.vectors.len() * std::mem::size_of::<f32>()
    }

    /// Ranking key: larger is always better.
    #[inline]
    fn key(&self, query: &[f32], row: &[f32]) -> f32 {
        match self.metric {
            Metric::InnerProduct => dot_product(query, row),
            Metric::L2 => -l2_distance_squared(query, row),
        }
    }

    fn sentinel_score(&self) -> f32 {
        match self.metric {
            Metric::InnerProduct => f32::MIN,
            Metric::L2 => f32::MAX,
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.vectors.len().checked_div(self.dim).unwrap_or(0)
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        debug_assert_eq!(query.len(), self.dim, "query dimension mismatch");
        if k == 0 || self.dim == 0 {
            return Vec::new();
        }

        let block = self.dim * ROWS_PER_TASK;
        let best = self
            .vectors
            .par_chunks(block)
            .enumerate()
            .map(|(block_idx, rows)| {
                let base = block_idx * ROWS_PER_TASK;
                let mut heap = BinaryHeap::with_capacity(k + 1);
                for (offset, row) in rows.chunks_exact(self.dim).enumerate() {
                    offer(
                        &mut heap,
                        k,
                        Ranked {
                            key: self.key(query, row),
                            row: base + offset,
                        },
                    );
                }
                heap
            })
            .reduce(BinaryHeap::new, |mut acc, other| {
                for candidate in other {
                    offer(&mut acc, k, candidate);
                }
                acc
            });

        let mut neighbors: Vec<Neighbor> = best
            .into_sorted_vec()
            .into_iter()
            .map(|r| Neighbor {
                score: match self.metric {
                    Metric::InnerProduct => r.key,
                    Metric::L2 => -r.key,
                },
                row: r.row as i64,
            })
            .collect();

        neighbors.resize(
            k,
            Neighbor {
                score: self.sentinel_score(),
                row: NO_RESULT,
            },
        );
        neighbors
    }
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    key: f32,
    row: usize,
}

// Greater means worse, so the heap top is the weakest candidate kept.
// Equal keys prefer the lower row.
impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| self.row.cmp(&other.row))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

#[inline]
fn offer(heap: &mut BinaryHeap<Ranked>, k: usize, candidate: Ranked) {
    if heap.len() < k {
        heap.push(candidate);
    } else if heap.peek().is_some_and(|worst| candidate < *worst) {
        heap.pop();
        heap.push(candidate);
    }
}
