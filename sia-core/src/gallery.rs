use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::MetadataStore;
use crate::error::{CoreError, Result};

/// One entry of `images.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub path: String,
    pub folder: String,
    pub name: String,
    pub mtime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Rebuilds `base_dir/images.json` from the metadata store. The manifest is
/// a pure function of the store at the moment of the last rebuild; readers
/// always see a complete file because the write lands via temp-then-rename.
#[derive(Debug, Clone)]
pub struct GalleryIndexer {
    base_dir: PathBuf,
}

impl GalleryIndexer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.base_dir.join("images.json")
    }

    pub async fn rebuild(&self, store: &MetadataStore) -> Result<Vec<GalleryEntry>> {
        let rows = store.list_all_files().await?;
        let entries: Vec<GalleryEntry> = rows
            .into_iter()
            .map(|row| {
                let name = Path::new(&row.relative_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| row.relative_path.clone());
                GalleryEntry {
                    path: row.relative_path,
                    folder: row.folder_name,
                    name,
                    mtime: row.mtime,
                    post_id: row.post_id,
                    source: row.source_url,
                }
            })
            .collect();

        self.write_manifest(&entries).await?;
        info!(count = entries.len(), "gallery index rebuilt");
        Ok(entries)
    }

    /// Read the existing manifest, or materialize and return an empty one if
    /// absent.
    pub async fn read_or_init(&self) -> Result<Vec<GalleryEntry>> {
        let path = self.manifest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| CoreError::InvalidInput(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.write_manifest(&[]).await?;
                Ok(Vec::new())
            }
            Err(e) => Err(CoreError::io(path, e)),
        }
    }

    async fn write_manifest(&self, entries: &[GalleryEntry]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| CoreError::io(&self.base_dir, e))?;

        let path = self.manifest_path();
        let tmp = self.base_dir.join(".images.json.tmp");
        let body = serde_json::to_vec_pretty(entries)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| CoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_or_init_materializes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = GalleryIndexer::new(dir.path());

        let entries = indexer.read_or_init().await.unwrap();
        assert!(entries.is_empty());
        assert!(indexer.manifest_path().exists());
    }

    #[tokio::test]
    async fn rebuild_reflects_store_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        let (asset_id, _) = store
            .upsert_asset_by_hash(&mut tx, "hash1", "jpg", 4)
            .await
            .unwrap();
        let item_id = store
            .create_item(&mut tx, "alice", "p1", Some("https://example.com/p1"))
            .await
            .unwrap();
        store
            .insert_file(
                &mut tx,
                asset_id,
                "00001_alice/00001_alice_001.jpg",
                "00001_alice",
                Utc::now(),
                Some(item_id),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let indexer = GalleryIndexer::new(dir.path());
        let entries = indexer.rebuild(&store).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].folder, "00001_alice");
        assert_eq!(entries[0].post_id.as_deref(), Some("p1"));

        let on_disk = indexer.read_or_init().await.unwrap();
        assert_eq!(on_disk.len(), 1);
    }
}
