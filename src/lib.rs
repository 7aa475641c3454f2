//! Popcorn Vector: movie similarity search over a FAISS flat index
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │                  POST /search, GET /health                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SearchHandler                         │
//! │     validate + normalize query · join rows to meta.json     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            popcorn-core: FlatIndex · MetadataStore          │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ faiss.index, meta.json
//! ┌─────────────────────────────────────────────────────────────┐
//! │          AssetProvisioner (local cache ← S3 bucket)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod provision;
pub mod search;
pub mod server;

pub use popcorn_core::{bundle, faiss, index, metadata, simd};

pub use config::ServiceConfig;
pub use provision::{AssetProvisioner, ProvisionError};
pub use search::{LoadError, SearchError, SearchHandler, SearchHit};
pub use server::{create_router, serve, AppState};
