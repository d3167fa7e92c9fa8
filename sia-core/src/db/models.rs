use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Asset {
    pub id: i64,
    pub content_hash: String,
    pub extension: String,
    pub byte_length: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub exif_taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRow {
    pub id: i64,
    pub asset_id: i64,
    pub relative_path: String,
    pub folder_name: String,
    pub mtime: DateTime<Utc>,
    pub item_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Item {
    pub id: i64,
    pub author: String,
    pub post_id: String,
    pub source_url: Option<String>,
    pub saved_at: DateTime<Utc>,
}

/// One row of the joined file/item listing served by `GET /api/items` and
/// folded into the gallery manifest by the indexer.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileWithProvenance {
    pub relative_path: String,
    pub folder_name: String,
    pub mtime: DateTime<Utc>,
    pub post_id: Option<String>,
    pub source_url: Option<String>,
}
