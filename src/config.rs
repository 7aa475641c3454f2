//! Service configuration
//!
//! Every setting can come from a CLI flag or its environment variable, so the
//! container can be configured purely through `LOCAL_DATA_PATH`,
//! `INDEX_BUCKET`, `INDEX_PREFIX` and `PORT`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Args;
use popcorn_core::AssetPaths;

pub const DEFAULT_DATA_PATH: &str = "/opt/data";
pub const DEFAULT_PREFIX: &str = "index";
pub const DEFAULT_PORT: u16 = 8008;

/// Subdirectory of the data path holding the bundle.
const ASSET_SUBDIR: &str = "index";

/// Where assets live locally and where to fetch them from
#[derive(Debug, Clone, Args)]
pub struct AssetArgs {
    /// Base directory for the local asset cache
    #[arg(long, env = "LOCAL_DATA_PATH", default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Bucket holding faiss.index and meta.json (needed only when they are not cached)
    #[arg(long, env = "INDEX_BUCKET")]
    pub bucket: Option<String>,

    /// Object key prefix inside the bucket
    #[arg(long, env = "INDEX_PREFIX", default_value = DEFAULT_PREFIX)]
    pub prefix: String,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub assets: AssetArgs,

    /// Address to bind to
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Server port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub data_path: PathBuf,
    pub bucket: Option<String>,
    pub prefix: String,
    pub listen: SocketAddr,
}

impl ServiceConfig {
    /// Normalize raw settings: a blank data path falls back to the default,
    /// a blank bucket counts as unset, and the prefix loses its surrounding
    /// slashes.
    pub fn new(
        data_path: PathBuf,
        bucket: Option<String>,
        prefix: &str,
        listen: SocketAddr,
    ) -> Self {
        let data_path = if data_path.as_os_str().to_string_lossy().trim().is_empty() {
            PathBuf::from(DEFAULT_DATA_PATH)
        } else {
            data_path
        };
        let bucket = bucket
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        let prefix = if prefix.trim().is_empty() {
            DEFAULT_PREFIX
        } else {
            prefix
        };

        Self {
            data_path,
            bucket,
            prefix: prefix.trim().trim_matches('/').to_string(),
            listen,
        }
    }

    /// Config with defaults for everything but the data path.
    pub fn for_data_path(data_path: impl Into<PathBuf>) -> Self {
        Self::new(
            data_path.into(),
            None,
            DEFAULT_PREFIX,
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        )
    }

    pub fn asset_paths(&self) -> AssetPaths {
        AssetPaths::in_dir(self.data_path.join(ASSET_SUBDIR))
    }
}

impl From<&AssetArgs> for ServiceConfig {
    fn from(args: &AssetArgs) -> Self {
        Self::new(
            args.data_path.clone(),
            args.bucket.clone(),
            &args.prefix,
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        )
    }
}

impl From<&ServeArgs> for ServiceConfig {
    fn from(args: &ServeArgs) -> Self {
        Self::new(
            args.assets.data_path.clone(),
            args.assets.bucket.clone(),
            &args.assets.prefix,
            SocketAddr::new(args.host, args.port),
        )
    }
}
