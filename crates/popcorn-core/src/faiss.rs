//! FAISS flat index serialization
//!
//! Reads and writes the on-disk layout `faiss::write_index` produces for
//! `IndexFlatIP` / `IndexFlatL2`, so indexes exported by the Python tooling can
//! be served without a FAISS runtime.
//!
//! # File Structure
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     4       [u8; 4]     fourcc: "IxFI" (IP), "IxF2" (L2) or "IxFl" (legacy)
//! 0x04     4       i32 LE      d: dimensions
//! 0x08     8       i64 LE      ntotal: number of vectors
//! 0x10     8       i64 LE      dummy (1 << 20)
//! 0x18     8       i64 LE      dummy (1 << 20)
//! 0x20     1       u8          is_trained
//! 0x21     4       i32 LE      metric: 0 = inner product, 1 = L2
//! 0x25     8       u64 LE      count: number of f32 values (d * ntotal)
//! 0x2D     count*4 [f32]       row-major vector data (Little Endian)
//! ```
//!
//! Metrics above 1 carry an extra `f32` argument after the metric; no flat
//! index the service can rank with uses one, so they are rejected.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FOURCC_FLAT_IP: [u8; 4] = *b"IxFI";
pub const FOURCC_FLAT_L2: [u8; 4] = *b"IxF2";
pub const FOURCC_FLAT: [u8; 4] = *b"IxFl";

/// Placeholder FAISS writes into two retired header fields.
const HEADER_DUMMY: i64 = 1 << 20;

const NTOTAL_OFFSET: u64 = 8;
const COUNT_OFFSET: u64 = 37;

/// Floats read per `read_exact`, bounding allocation before the data is seen.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Unsupported index type {0:?}: only flat indexes (IxFI, IxF2, IxFl) can be loaded")]
    UnsupportedIndex(String),

    #[error("Unsupported metric type {0}")]
    UnsupportedMetric(i32),

    #[error("Index type {fourcc} does not match metric {metric:?}")]
    MetricMismatch { fourcc: String, metric: Metric },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Similarity metric an index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Higher is better. Equals cosine similarity for unit vectors.
    InnerProduct,
    /// Squared Euclidean distance. Lower is better.
    L2,
}

impl Metric {
    pub fn from_raw(raw: i32) -> Result<Self, FormatError> {
        match raw {
            0 => Ok(Metric::InnerProduct),
            1 => Ok(Metric::L2),
            other => Err(FormatError::UnsupportedMetric(other)),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Metric::InnerProduct => FOURCC_FLAT_IP,
            Metric::L2 => FOURCC_FLAT_L2,
        }
    }

    /// Whether a larger score ranks first.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::InnerProduct)
    }
}

/// Parsed flat index header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatHeader {
    pub fourcc: [u8; 4],
    pub dim: usize,
    pub ntotal: usize,
    pub is_trained: bool,
    pub metric: Metric,
}

impl FlatHeader {
    pub fn new(dim: usize, ntotal: usize, metric: Metric) -> Self {
        Self {
            fourcc: metric.fourcc(),
            dim,
            ntotal,
            is_trained: true,
            metric,
        }
    }

    /// Read the header and the trailing value count, leaving `reader` at the
    /// first vector float.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut fourcc = [0u8; 4];
        reader.read_exact(&mut fourcc)?;
        if ![FOURCC_FLAT_IP, FOURCC_FLAT_L2, FOURCC_FLAT].contains(&fourcc) {
            return Err(FormatError::UnsupportedIndex(
                String::from_utf8_lossy(&fourcc).into_owned(),
            ));
        }

        let dim = read_i32(reader)?;
        let ntotal = read_i64(reader)?;
        let _ = read_i64(reader)?;
        let _ = read_i64(reader)?;
        let is_trained = read_u8(reader)? != 0;
        let metric = Metric::from_raw(read_i32(reader)?)?;

        if fourcc != FOURCC_FLAT && fourcc != metric.fourcc() {
            return Err(FormatError::MetricMismatch {
                fourcc: String::from_utf8_lossy(&fourcc).into_owned(),
                metric,
            });
        }
        if dim <= 0 {
            return Err(FormatError::InvalidHeader(format!(
                "dimension must be positive, got {}",
                dim
            )));
        }
        if ntotal < 0 {
            return Err(FormatError::InvalidHeader(format!(
                "negative vector count {}",
                ntotal
            )));
        }

        let dim = dim as usize;
        let ntotal = usize::try_from(ntotal)
            .map_err(|_| FormatError::InvalidHeader(format!("vector count {} too large", ntotal)))?;
        let expected = dim
            .checked_mul(ntotal)
            .ok_or_else(|| FormatError::InvalidHeader("d * ntotal overflows".into()))?;

        let count = read_u64(reader)?;
        if count != expected as u64 {
            return Err(FormatError::InvalidHeader(format!(
                "value count {} does not match d * ntotal = {}",
                count, expected
            )));
        }

        Ok(Self {
            fourcc,
            dim,
            ntotal,
            is_trained,
            metric,
        })
    }

    /// Write the header including the value count.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.fourcc)?;
        writer.write_all(&(self.dim as i32).to_le_bytes())?;
        writer.write_all(&(self.ntotal as i64).to_le_bytes())?;
        writer.write_all(&HEADER_DUMMY.to_le_bytes())?;
        writer.write_all(&HEADER_DUMMY.to_le_bytes())?;
        writer.write_all(&[self.is_trained as u8])?;
        writer.write_all(&self.metric.to_raw().to_le_bytes())?;
        writer.write_all(&((self.dim * self.ntotal) as u64).to_le_bytes())?;
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self.fourcc {
            FOURCC_FLAT_IP => "IndexFlatIP",
            FOURCC_FLAT_L2 => "IndexFlatL2",
            _ => "IndexFlat",
        }
    }
}

/// Read a complete flat index: header plus `dim * ntotal` row-major floats.
pub fn read_flat<R: Read>(reader: &mut R) -> Result<(FlatHeader, Vec<f32>), FormatError> {
    let header = FlatHeader::read_from(reader)?;
    let total = header.dim * header.ntotal;

    let mut data = Vec::with_capacity(total.min(READ_CHUNK * 16));
    let mut chunk = vec![0f32; total.min(READ_CHUNK)];
    let mut remaining = total;
    while remaining > 0 {
        let n = remaining.min(READ_CHUNK);
        reader.read_exact(bytemuck::cast_slice_mut(&mut chunk[..n]))?;
        data.extend(
            chunk[..n]
                .iter()
                .map(|v| f32::from_bits(u32::from_le(v.to_bits()))),
        );
        remaining -= n;
    }

    Ok((header, data))
}

/// Open and read a flat index file.
pub fn read_flat_file<P: AsRef<Path>>(path: P) -> Result<(FlatHeader, Vec<f32>), FormatError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_flat(&mut reader)
}

/// Parse arbitrary bytes as a flat index. Entry point for the fuzz target.
pub fn fuzz_read_flat_bytes(data: &[u8]) -> Result<FlatHeader, FormatError> {
    let mut cursor = io::Cursor::new(data);
    read_flat(&mut cursor).map(|(header, _)| header)
}

/// Writer for FAISS-compatible flat index files
///
/// ```ignore
/// let mut writer = FlatIndexWriter::new("faiss.index", 384, Metric::InnerProduct)?;
/// writer.write_vector(&embedding)?;
/// writer.finish()?;
/// ```
pub struct FlatIndexWriter {
    writer: BufWriter<File>,
    dim: usize,
    count: usize,
}

impl FlatIndexWriter {
    pub fn new<P: AsRef<Path>>(path: P, dim: usize, metric: Metric) -> Result<Self, FormatError> {
        if dim == 0 || dim > i32::MAX as usize {
            return Err(FormatError::InvalidHeader(format!(
                "dimension must be in 1..={}, got {}",
                i32::MAX,
                dim
            )));
        }

        let mut writer = BufWriter::new(File::create(path)?);
        // ntotal and count are patched in finish()
        FlatHeader::new(dim, 0, metric).write_to(&mut writer)?;

        Ok(Self {
            writer,
            dim,
            count: 0,
        })
    }

    pub fn write_vector(&mut self, vector: &[f32]) -> Result<(), FormatError> {
        if vector.len() != self.dim {
            return Err(FormatError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        for &val in vector {
            self.writer.write_all(&val.to_le_bytes())?;
        }
        self.count += 1;
        Ok(())
    }

    /// Patch the header with the final count and sync. Returns the number of
    /// vectors written.
    pub fn finish(mut self) -> Result<usize, FormatError> {
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(NTOTAL_OFFSET))?;
        file.write_all(&(self.count as i64).to_le_bytes())?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&((self.count * self.dim) as u64).to_le_bytes())?;
        file.sync_all()?;

        Ok(self.count)
    }
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
