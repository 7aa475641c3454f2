//! Metadata sidecar for an index
//!
//! `meta.json` is a JSON object holding the expected vector dimension and one
//! record per index row, in row order:
//!
//! ```text
//! {
//!   "dim": 1536,
//!   "items": [ {"imdbId": "tt0111161", "title": "...", "year": 1994, "productionCountry": "US"}, ... ]
//! }
//! ```
//!
//! Row `i` of the index is joined to `items[i]`; there is no explicit key.
//! Records are loosely typed: any field may be missing or hold any JSON value,
//! and an item that is not an object reads as an empty record.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const META_FILE: &str = "meta.json";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON in meta.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("meta.json must be an object with an 'items' field")]
    Shape,
}

/// Domain fields surfaced for a matched row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieRecord {
    pub imdb_id: Value,
    pub title: Value,
    pub year: Value,
    pub production_country: Value,
}

impl MovieRecord {
    /// Pick the known fields out of an item, defaulting each to `null`.
    pub fn from_item(item: &Value) -> Self {
        let Some(fields) = item.as_object() else {
            return Self::default();
        };
        let get = |key: &str| fields.get(key).cloned().unwrap_or(Value::Null);
        Self {
            imdb_id: get("imdbId"),
            title: get("title"),
            year: get("year"),
            production_country: get("productionCountry"),
        }
    }
}

/// Parsed `meta.json`, immutable after load
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dim: Value,
    items: Vec<Value>,
}

impl MetadataStore {
    pub fn new(dim: usize, items: Vec<Value>) -> Self {
        Self {
            dim: Value::from(dim),
            items,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
        let bytes = fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parse metadata. The document must be an object whose `items` is an
    /// array; `dim` is kept as-is and only interpreted by [`Self::dim`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MetadataError> {
        let root: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut root) = root else {
            return Err(MetadataError::Shape);
        };
        let Some(Value::Array(items)) = root.remove("items") else {
            return Err(MetadataError::Shape);
        };
        let dim = root.remove("dim").unwrap_or(Value::Null);

        Ok(Self { dim, items })
    }

    /// Declared vector dimension, if it is a positive integer.
    ///
    /// Accepts JSON integers, floats (truncated toward zero) and strings
    /// holding an integer.
    pub fn dim(&self) -> Option<usize> {
        let dim = match &self.dim {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        usize::try_from(dim).ok().filter(|&d| d > 0)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, row: usize) -> Option<&Value> {
        self.items.get(row)
    }

    /// Record for an index row, or `None` when the row is out of bounds.
    pub fn record(&self, row: usize) -> Option<MovieRecord> {
        self.item(row).map(MovieRecord::from_item)
    }

    /// Write as `meta.json`, replacing any existing file only once the new
    /// content is fully on disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MetadataError> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("json.tmp");

        let mut root = Map::new();
        root.insert("dim".into(), self.dim.clone());
        root.insert("items".into(), Value::Array(self.items.clone()));

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &root)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
