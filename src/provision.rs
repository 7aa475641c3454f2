//! Local asset cache backed by object storage
//!
//! Before the search state is built, `faiss.index` and `meta.json` must be
//! present in the local bundle directory. If either is missing both are
//! fetched from `<bucket>/<prefix>/`. Each download is streamed into a
//! `.part` file and renamed into place only once it is complete, so an
//! interrupted fetch never leaves a truncated asset behind.

use std::path::{Path as FsPath, PathBuf};

use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore;
use popcorn_core::{AssetPaths, INDEX_FILE, META_FILE};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::ServiceConfig;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Missing INDEX_BUCKET env var")]
    MissingBucket,

    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Makes sure the bundle directory holds both assets
#[derive(Debug, Clone)]
pub struct AssetProvisioner {
    paths: AssetPaths,
    bucket: Option<String>,
    prefix: String,
}

impl AssetProvisioner {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            paths: config.asset_paths(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    /// Fetch the assets from S3 unless both are already cached.
    ///
    /// Credentials and region come from the standard `AWS_*` environment.
    pub async fn ensure_available(&self) -> Result<&AssetPaths, ProvisionError> {
        if self.paths.is_complete() {
            tracing::debug!("Assets already present in {}", self.paths.dir.display());
            return Ok(&self.paths);
        }

        let bucket = self.bucket.as_deref().ok_or(ProvisionError::MissingBucket)?;
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;

        tracing::info!(
            "Downloading assets from s3://{}/{} to {}",
            bucket,
            self.prefix,
            self.paths.dir.display()
        );
        self.download_all(&store).await?;
        Ok(&self.paths)
    }

    /// Same as [`Self::ensure_available`], with an explicit store.
    pub async fn ensure_available_with(
        &self,
        store: &dyn ObjectStore,
    ) -> Result<&AssetPaths, ProvisionError> {
        if self.paths.is_complete() {
            return Ok(&self.paths);
        }
        self.download_all(store).await?;
        Ok(&self.paths)
    }

    async fn download_all(&self, store: &dyn ObjectStore) -> Result<(), ProvisionError> {
        tokio::fs::create_dir_all(&self.paths.dir).await?;

        // Both files are refreshed together so a stale one cannot pair with a
        // fresh one.
        for (name, dest) in [
            (INDEX_FILE, &self.paths.index),
            (META_FILE, &self.paths.metadata),
        ] {
            let location = self.remote_path(name);
            let bytes = download(store, &location, dest).await?;
            tracing::info!("Fetched {} ({} bytes)", location, bytes);
        }

        sync_dir(&self.paths.dir).await?;
        Ok(())
    }

    fn remote_path(&self, name: &str) -> Path {
        Path::from(self.prefix.as_str()).child(name)
    }
}

async fn download(
    store: &dyn ObjectStore,
    location: &Path,
    dest: &FsPath,
) -> Result<u64, ProvisionError> {
    let part = part_path(dest);
    match stream_to(store, location, &part).await {
        Ok(bytes) => {
            tokio::fs::rename(&part, dest).await?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to(
    store: &dyn ObjectStore,
    location: &Path,
    part: &FsPath,
) -> Result<u64, ProvisionError> {
    let mut stream = store.get(location).await?.into_stream();
    let mut file = tokio::fs::File::create(part).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn part_path(dest: &FsPath) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn sync_dir(dir: &FsPath) -> Result<(), ProvisionError> {
    #[cfg(unix)]
    {
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
