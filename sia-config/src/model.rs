use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Content-type / size / retry policy applied to every downloaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    pub allowed_content_types: BTreeSet<String>,
    pub max_body_kb: u64,
    pub max_attempts: u32,
    pub timeout_seconds: u64,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            allowed_content_types: [
                "image/jpeg",
                "image/png",
                "image/gif",
                "image/webp",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            max_body_kb: 64,
            max_attempts: 4,
            timeout_seconds: 30,
        }
    }
}

/// Durable daemon configuration, persisted as YAML at [`crate::config_path`].
///
/// Unknown keys in an on-disk file are ignored by `serde_yaml`'s default
/// behavior; missing keys fall back to [`SiaConfig::default`] via `#[serde(default)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiaConfig {
    pub base_dir: PathBuf,
    pub port: u16,
    pub hmac_key: String,
    pub concurrency: u32,
    pub retry_backoff: f64,
    pub enable_hardlinks: bool,
    pub log_dir: PathBuf,
    pub download: DownloadPolicy,
}

impl Default for SiaConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            base_dir: home.join("SIA-Gallery"),
            port: 18080,
            hmac_key: "change-me".to_owned(),
            concurrency: 2,
            retry_backoff: 0.5,
            enable_hardlinks: false,
            log_dir: crate::config_dir().join("logs"),
            download: DownloadPolicy::default(),
        }
    }
}
