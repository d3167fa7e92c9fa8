use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{Json, Response};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub author: String,
    #[serde(rename = "postId")]
    pub post_id: String,
    pub images: Vec<String>,
    pub source: Option<String>,
    #[allow(dead_code)]
    pub caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub ok: bool,
    pub saved: Vec<String>,
    pub duplicates: Vec<String>,
    pub failed: Vec<FailedImage>,
}

#[derive(Debug, Serialize)]
pub struct FailedImage {
    pub url: String,
    pub reason: String,
}

/// `POST /save` — see the module's admission/execution contract.
pub async fn save_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let config = state.config.get();

    if body.len() as u64 > config.download.max_body_kb * 1024 {
        return Err(ApiError::BodyTooLarge);
    }

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::AuthFailed)?;
    if !state.signer.verify(&body, signature) {
        return Err(ApiError::AuthFailed);
    }

    let request: SaveRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::RequestInvalid(format!("malformed JSON body: {e}")))?;

    if request.author.trim().is_empty() {
        return Err(ApiError::RequestInvalid("author must not be blank".into()));
    }
    if request.images.is_empty() {
        return Err(ApiError::RequestInvalid("images must not be empty".into()));
    }
    let urls = validate_urls(&request.images)?;

    let folder = state.naming.resolve_author_folder(&request.author).await?;
    let folder_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tx = state.store.pool().begin().await.map_err(sia_core::CoreError::from)?;
    let item_id = state
        .store
        .create_item(&mut tx, &request.author, &request.post_id, request.source.as_deref())
        .await?;
    tx.commit().await.map_err(sia_core::CoreError::from)?;

    let indices = state
        .naming
        .reserve_indices(&folder, urls.len() as u32)
        .await?;

    let mut saved = Vec::new();
    let mut duplicates = Vec::new();
    let mut failed = Vec::new();

    for (url, index) in urls.into_iter().zip(indices) {
        let ext = extension_from_url(&url);
        let placeholder = folder.join(format!("{folder_name}_{index:03}.part-reserved"));
        let destination = folder.join(format!("{folder_name}_{index:03}.{ext}"));
        let _ = tokio::fs::remove_file(&placeholder).await;

        match state
            .downloader
            .download(&url, &destination, &config.download)
            .await
        {
            Ok(outcome) => {
                let relative_path = relative_to(&state.base_dir, &destination);
                let mtime = chrono::Utc::now();

                let mut tx = state.store.pool().begin().await.map_err(sia_core::CoreError::from)?;

                let (asset_id, was_new) = state
                    .store
                    .upsert_asset_by_hash(&mut tx, &outcome.content_hash, &ext, outcome.byte_length)
                    .await?;

                state
                    .store
                    .insert_file(&mut tx, asset_id, &relative_path, &folder_name, mtime, Some(item_id))
                    .await?;

                tx.commit().await.map_err(sia_core::CoreError::from)?;

                if was_new {
                    saved.push(relative_path);
                } else {
                    duplicates.push(relative_path);
                }
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&destination).await;
                failed.push(FailedImage { url, reason: e.to_string() });
            }
        }
    }

    state.gallery.rebuild(&state.store).await?;

    Ok(Json(SaveResponse {
        ok: true,
        saved,
        duplicates,
        failed,
    })
    .into_response())
}

fn validate_urls(images: &[String]) -> Result<Vec<String>, ApiError> {
    let mut out = Vec::with_capacity(images.len());
    for raw in images {
        let parsed = Url::parse(raw)
            .map_err(|_| ApiError::RequestInvalid(format!("not a well-formed URL: {raw}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::RequestInvalid(format!(
                "URL must be absolute HTTP(S): {raw}"
            )));
        }
        out.push(raw.clone());
    }
    Ok(out)
}

fn extension_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let path = u.path();
            std::path::Path::new(path)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "jpg".to_string())
}

fn relative_to(base_dir: &std::path::Path, path: &std::path::Path) -> String {
    path.strip_prefix(base_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
