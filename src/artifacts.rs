//! Temporary artifact lifecycle for a single run.
//!
//! Every local file a run creates is registered here before the next
//! stage touches it, and the whole set is drained exactly once when the
//! run terminates, whatever the outcome. Deletion failures are logged
//! and never escalated.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::PipelineError;

#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        log::debug!("Tracking temporary artifact {}", path.display());
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Remove every registered path. Runs on all exit paths of a run.
    pub async fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("Cleaned up {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to clean up {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for TempArtifacts {
    // Backstop for paths that were never drained (a run that panicked
    // between registration and cleanup).
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to clean up {} on drop: {}", path.display(), e);
                }
            }
        }
    }
}

/// Unique path under `work_dir` for a run-local artifact. Timestamp
/// plus a random suffix keeps concurrent runs from colliding.
pub fn unique_work_path(work_dir: &Path, prefix: &str, ext: &str) -> PathBuf {
    let suffix: u32 = rand::random();
    work_dir.join(format!(
        "{}_{}_{:08x}.{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        suffix,
        ext
    ))
}

/// Fetches a remote resource to a local file. A trait seam so runs can
/// be exercised without a network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), PipelineError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        let download_err = |reason: String| PipelineError::Download {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(download_err(format!("status {}", resp.status())));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| download_err(format!("cannot create {}: {}", dest.display(), e)))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| download_err(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        log::info!("Downloaded {} -> {}", url, dest.display());
        Ok(())
    }
}
