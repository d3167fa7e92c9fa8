use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use sia_config::DownloadPolicy;

use crate::error::{CoreError, Result};

const CHUNK_HINT: usize = 8 * 1024;

/// The outcome of a successful download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub content_hash: String,
    pub byte_length: u64,
    pub content_type: String,
}

/// Streaming downloader with retry/backoff and atomic placement, grounded in
/// a shared `reqwest::Client` built once and reused across requests for
/// connection pooling.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` into `destination`, retrying per `policy`. Returns the
    /// hex SHA-256 of the bytes, their length, and the normalized content
    /// type. `TypeNotAllowed` is terminal and is never retried.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        policy: &DownloadPolicy,
    ) -> Result<DownloadOutcome> {
        let mut backoff = Duration::from_millis(500);

        for attempt in 1..=policy.max_attempts.max(1) {
            match self.attempt(url, destination, policy).await {
                Ok(outcome) => return Ok(outcome),
                Err(CoreError::TypeNotAllowed { found }) => {
                    return Err(CoreError::TypeNotAllowed { found });
                }
                Err(err) if attempt == policy.max_attempts.max(1) => {
                    return Err(CoreError::DownloadPermanent(format!(
                        "{url}: exhausted {attempt} attempts: {err}"
                    )));
                }
                Err(err) => {
                    warn!(url, attempt, error = %err, "download attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        unreachable!("loop always returns")
    }

    async fn attempt(
        &self,
        url: &str,
        destination: &Path,
        policy: &DownloadPolicy,
    ) -> Result<DownloadOutcome> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(policy.timeout_seconds))
            .send()
            .await
            .map_err(|e| CoreError::DownloadTransient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::DownloadTransient(format!(
                "status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
            .unwrap_or_default();

        if !policy.allowed_content_types.contains(&content_type) {
            return Err(CoreError::TypeNotAllowed {
                found: Some(content_type),
            });
        }

        let expected_len = response.content_length();

        let part_path = part_path(destination);
        let result = self.stream_to_part(response, &part_path).await;

        let (hash, byte_length) = match result {
            Ok(v) => v,
            Err(err) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(err);
            }
        };

        if let Some(expected) = expected_len {
            if expected != byte_length {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(CoreError::DownloadTransient(format!(
                    "content-length {expected} disagrees with {byte_length} bytes read"
                )));
            }
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::io(parent, e))?;
        }

        tokio::fs::rename(&part_path, destination)
            .await
            .map_err(|e| CoreError::io(destination, e))?;

        debug!(url, destination = %destination.display(), byte_length, "download committed");

        Ok(DownloadOutcome {
            content_hash: hash,
            byte_length,
            content_type,
        })
    }

    async fn stream_to_part(
        &self,
        response: reqwest::Response,
        part_path: &Path,
    ) -> Result<(String, u64)> {
        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| CoreError::io(part_path, e))?;

        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        let mut buffer = Vec::with_capacity(CHUNK_HINT);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CoreError::DownloadTransient(e.to_string()))?;
            buffer.extend_from_slice(&chunk);
            total += chunk.len() as u64;

            if buffer.len() >= CHUNK_HINT {
                hasher.update(&buffer);
                file.write_all(&buffer)
                    .await
                    .map_err(|e| CoreError::io(part_path, e))?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            hasher.update(&buffer);
            file.write_all(&buffer)
                .await
                .map_err(|e| CoreError::io(part_path, e))?;
        }

        file.flush().await.map_err(|e| CoreError::io(part_path, e))?;

        let hash = hex::encode(hasher.finalize());
        Ok((hash, total))
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut os = destination.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}
