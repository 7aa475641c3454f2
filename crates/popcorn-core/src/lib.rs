//! Popcorn Core – flat vector index, FAISS flat serialization, metadata sidecar
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              FlatIndex (exact k-NN, rayon scan)             │
//! │        VectorIndex trait · IP / L2 ranking · sentinels      │
//! ├─────────────────────────────────────────────────────────────┤
//! │      FAISS flat format (IxFI / IxF2)  ·  meta.json store    │
//! ├─────────────────────────────────────────────────────────────┤
//! │              SIMD math (NEON · AVX2+FMA · scalar)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bundle;
pub mod faiss;
pub mod index;
pub mod metadata;
pub mod simd;

pub use bundle::{AssetPaths, BundleError, BundleWriter, INDEX_FILE};
pub use faiss::{FlatHeader, FlatIndexWriter, FormatError, Metric};
pub use index::{FlatIndex, Neighbor, VectorIndex, NO_RESULT};
pub use metadata::{MetadataError, MetadataStore, MovieRecord, META_FILE};
pub use simd::{dot_product, l2_distance_squared, l2_norm, l2_normalized};
