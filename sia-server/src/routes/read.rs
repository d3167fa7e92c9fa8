use std::path::{Component, PathBuf};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

/// `GET /images.json` — the current derived index, materializing an empty
/// one if it doesn't exist yet.
pub async fn images_json(State(state): State<AppState>) -> Result<Response, ApiError> {
    let entries = state.gallery.read_or_init().await?;
    Ok(Json(entries).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    author: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    items: Vec<sia_core::FileWithProvenance>,
    page: u32,
    page_size: u32,
    total: i64,
}

/// `GET /api/items?page&page_size&author&q`
pub async fn items_handler(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> Result<Response, ApiError> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(40);

    let (items, total) = state
        .store
        .list_files(query.author.as_deref(), query.q.as_deref(), page, page_size)
        .await?;

    Ok(Json(ItemsResponse {
        items,
        page,
        page_size,
        total,
    })
    .into_response())
}

/// `GET /<relative-path>` — serve a file under `base_dir`, rejecting any
/// request whose canonicalized target escapes it.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(requested): Path<String>,
) -> Response {
    match resolve_within_base_dir(&state.base_dir, &requested) {
        Some(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let content_type = mime_guess_from_extension(&path);
                ([(axum::http::header::CONTENT_TYPE, content_type)], bytes).into_response()
            }
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn resolve_within_base_dir(base_dir: &std::path::Path, requested: &str) -> Option<PathBuf> {
    let candidate = base_dir.join(requested);

    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }

    let canonical_base = base_dir.canonicalize().ok()?;
    let canonical_candidate = candidate.canonicalize().ok()?;

    if canonical_candidate.starts_with(&canonical_base) {
        Some(canonical_candidate)
    } else {
        None
    }
}

fn mime_guess_from_extension(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_within_base_dir(dir.path(), "../etc/passwd").is_none());
    }

    #[test]
    fn resolves_file_inside_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let resolved = resolve_within_base_dir(dir.path(), "a.jpg");
        assert!(resolved.is_some());
    }
}
