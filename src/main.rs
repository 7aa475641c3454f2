//! Popcorn Vector CLI
//!
//! Movie similarity search over a FAISS flat index.
//!
//! # Usage
//!
//! ```bash
//! # Fetch assets if needed, then start the server (settings from env or flags)
//! INDEX_BUCKET=movies popcorn-vector serve --port 8008
//!
//! # Only populate the local asset cache
//! popcorn-vector provision --data-path /opt/data
//!
//! # Build faiss.index + meta.json from NDJSON records
//! popcorn-vector build --input items.ndjson --output-dir ./data/index
//!
//! # Inspect a bundle
//! popcorn-vector stats --dir ./data/index
//!
//! # Query a running server
//! popcorn-vector search --query 0.1,0.2,0.3 -k 5
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use popcorn_core::bundle::BundleWriter;
use popcorn_core::{AssetPaths, FlatHeader, MetadataStore, Metric};
use popcorn_vector::config::{AssetArgs, ServeArgs, ServiceConfig};
use popcorn_vector::provision::AssetProvisioner;
use popcorn_vector::search::{SearchHandler, DEFAULT_TOP_K};
use popcorn_vector::server::{serve, AppState, ErrorBody, SearchRequest, SearchResponse};

#[derive(Parser)]
#[command(name = "popcorn-vector")]
#[command(about = "Movie similarity search over a FAISS flat index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision assets, load them, and start the HTTP server
    Serve(ServeArgs),

    /// Download faiss.index and meta.json into the local cache, then exit
    Provision(AssetArgs),

    /// Build faiss.index and meta.json from newline-delimited JSON
    ///
    /// Each line is an object with a `vector` array; every other field is
    /// kept as the row's metadata record.
    Build {
        /// Input NDJSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write faiss.index and meta.json into
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Similarity metric of the index
        #[arg(long, value_enum, default_value_t = MetricArg::Ip)]
        metric: MetricArg,
    },

    /// Display statistics about a bundle directory
    Stats {
        /// Directory holding faiss.index and meta.json
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Search for similar movies using the HTTP server
    Search {
        /// Server URL
        #[arg(long, default_value = "http://localhost:8008")]
        server: String,

        /// Query vector (comma separated floats)
        #[arg(
            short,
            long,
            required = true,
            value_delimiter = ',',
            allow_hyphen_values = true
        )]
        query: Vec<f32>,

        /// Number of results
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K as i64)]
        k: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    /// Inner product over unit vectors (cosine similarity)
    Ip,
    /// Squared Euclidean distance
    L2,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Ip => Metric::InnerProduct,
            MetricArg::L2 => Metric::L2,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = ServiceConfig::from(&args);
            let provisioner = AssetProvisioner::new(&config);

            let handler = SearchHandler::build(&provisioner)
                .await
                .context("failed to load search assets")?;

            serve(AppState::new(handler), config.listen).await?;
        }

        Commands::Provision(args) => {
            let config = ServiceConfig::from(&args);
            let provisioner = AssetProvisioner::new(&config);
            let paths = provisioner
                .ensure_available()
                .await
                .context("failed to provision assets")?;
            println!("Assets ready in {}", paths.dir.display());
        }

        Commands::Build {
            input,
            output_dir,
            metric,
        } => {
            let count = build_bundle(&input, &output_dir, metric.into())?;
            println!("Wrote {} items to {}", count, output_dir.display());
        }

        Commands::Stats { dir } => {
            let aligned = print_stats(&AssetPaths::in_dir(&dir))?;
            if !aligned {
                std::process::exit(1);
            }
        }

        Commands::Search { server, query, k } => {
            let client = reqwest::Client::new();
            let url = format!("{}/search", server.trim_end_matches('/'));

            let request = SearchRequest {
                vector: query,
                top_k: k,
            };

            let response = client.post(&url).json(&request).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                match response.json::<ErrorBody>().await {
                    Ok(error) => eprintln!("Error ({}): {}", status, error.detail),
                    Err(_) => eprintln!("Error: {}", status),
                }
                std::process::exit(1);
            }

            let result: SearchResponse = response.json().await?;
            println!("Results:");
            for hit in result.results {
                println!(
                    "  {} {} ({}), score: {:.4}",
                    display(&hit.record.imdb_id),
                    display(&hit.record.title),
                    display(&hit.record.year),
                    hit.score
                );
            }
        }
    }

    Ok(())
}

fn build_bundle(input: &Path, output_dir: &Path, metric: Metric) -> anyhow::Result<usize> {
    tracing::info!("Reading records from {:?}", input);
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?,
    );

    let mut writer: Option<BundleWriter> = None;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        let (vector, record) = parse_line(trimmed)
            .with_context(|| format!("line {}: invalid record", line_no + 1))?;

        // The first record fixes the bundle dimension.
        if writer.is_none() {
            tracing::info!("Using dimension {} from line {}", vector.len(), line_no + 1);
            writer = Some(BundleWriter::create(output_dir, vector.len(), metric)?);
        }
        if let Some(bundle) = writer.as_mut() {
            bundle
                .push(&vector, record)
                .with_context(|| format!("line {}", line_no + 1))?;
        }
    }

    let writer = writer.context("no records found in input")?;
    let summary = writer.finish()?;
    tracing::info!(
        "Built {:?} bundle: {} vectors of dimension {}",
        summary.metric,
        summary.count,
        summary.dim
    );
    Ok(summary.count)
}

/// Split one NDJSON object into its vector and the remaining record fields.
fn parse_line(line: &str) -> anyhow::Result<(Vec<f32>, Value)> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(line)? else {
        anyhow::bail!("expected a JSON object");
    };
    let vector = fields.remove("vector").context("missing `vector` field")?;
    let vector: Vec<f32> = serde_json::from_value(vector).context("`vector` must be numbers")?;
    if vector.is_empty() {
        anyhow::bail!("`vector` is empty");
    }
    Ok((vector, Value::Object(fields)))
}

/// Print what the bundle holds. Returns whether index and metadata agree.
fn print_stats(paths: &AssetPaths) -> anyhow::Result<bool> {
    let mut file = BufReader::new(
        File::open(&paths.index)
            .with_context(|| format!("failed to open {}", paths.index.display()))?,
    );
    let header = FlatHeader::read_from(&mut file)?;
    let metadata = MetadataStore::load(&paths.metadata)
        .with_context(|| format!("failed to read {}", paths.metadata.display()))?;
    let index_bytes = std::fs::metadata(&paths.index)?.len();

    println!("Index File: {:?}", paths.index);
    println!("  Type: {}", header.kind());
    println!("  Metric: {:?}", header.metric);
    println!("  Dimensions: {}", header.dim);
    println!("  Vectors: {}", header.ntotal);
    println!(
        "  File Size: {:.2} MB",
        index_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("Metadata File: {:?}", paths.metadata);
    println!("  Items: {}", metadata.len());
    match metadata.dim() {
        Some(dim) => println!("  Declared dim: {}", dim),
        None => println!("  Declared dim: (invalid)"),
    }

    let mut aligned = true;
    if header.ntotal != metadata.len() {
        println!(
            "MISMATCH: index has {} vectors, meta.json has {} items",
            header.ntotal,
            metadata.len()
        );
        aligned = false;
    }
    if metadata.dim() != Some(header.dim) {
        println!(
            "MISMATCH: index dimension {} vs meta.json dim {:?}",
            header.dim,
            metadata.dim()
        );
        aligned = false;
    }
    if aligned {
        println!("OK: index and metadata are aligned");
    }
    Ok(aligned)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
