use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sia_config::ConfigManager;
use sia_core::{Downloader, GalleryIndexer, MetadataStore, NamingEngine, RequestSigner};
use sia_server::{create_router, AppState};
use tower::ServiceExt;

const HMAC_KEY: &[u8] = b"test-key";

/// Spins up a tiny local HTTP server serving fixed image bytes, standing in
/// for the remote hosts `/save` downloads from. Mirrors the original Python
/// archiver's test approach of hitting a real local HTTP server rather than
/// mocking the client.
async fn spawn_image_server() -> std::net::SocketAddr {
    use axum::extract::Path as AxumPath;
    use axum::response::IntoResponse;
    use axum::routing::get;

    async fn serve(AxumPath(name): AxumPath<String>) -> impl IntoResponse {
        let bytes: Vec<u8> = match name.as_str() {
            "a.jpg" => b"fixture-image-content-a".to_vec(),
            "a-again.jpg" => b"fixture-image-content-a".to_vec(),
            "b.jpg" => b"fixture-image-content-b".to_vec(),
            _ => Vec::new(),
        };
        ([(axum::http::header::CONTENT_TYPE, "image/jpeg")], bytes)
    }

    let router = axum::Router::new().route("/{name}", get(serve));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

async fn test_state(base_dir: &std::path::Path) -> AppState {
    let config_path = base_dir.join("config.yaml");
    let config = Arc::new(ConfigManager::load(&config_path).unwrap());
    config
        .update(|c| {
            c.base_dir = base_dir.to_path_buf();
            c.hmac_key = String::from_utf8(HMAC_KEY.to_vec()).unwrap();
        })
        .unwrap();

    let store = Arc::new(MetadataStore::open(base_dir, 2).await.unwrap());

    AppState {
        config,
        store,
        downloader: Arc::new(Downloader::new(reqwest::Client::new())),
        naming: Arc::new(NamingEngine::new(base_dir)),
        gallery: Arc::new(GalleryIndexer::new(base_dir)),
        signer: Arc::new(RequestSigner::new(HMAC_KEY)),
        base_dir: base_dir.to_path_buf(),
    }
}

#[tokio::test]
async fn healthz_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn save_without_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()).await);

    let body = serde_json::json!({
        "author": "alice",
        "postId": "p1",
        "images": ["https://example.com/a.jpg"],
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn save_with_tampered_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()).await);

    let body = serde_json::json!({
        "author": "alice",
        "postId": "p1",
        "images": ["https://example.com/a.jpg"],
    })
    .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .header("x-signature", "0000000000000000000000000000000000000000000000000000000000000000")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn save_with_valid_signature_but_blank_author_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let signer = RequestSigner::new(HMAC_KEY);
    let app = create_router(test_state(dir.path()).await);

    let body = serde_json::json!({
        "author": "  ",
        "postId": "p1",
        "images": ["https://example.com/a.jpg"],
    })
    .to_string();
    let signature = signer.sign(body.as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .header("x-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn images_json_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/images.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn save_creates_file_and_reports_it_as_saved() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_image_server().await;
    let signer = RequestSigner::new(HMAC_KEY);
    let app = create_router(test_state(dir.path()).await);

    let body = serde_json::json!({
        "author": "alice",
        "postId": "p1",
        "images": [format!("http://{addr}/a.jpg")],
    })
    .to_string();
    let signature = signer.sign(body.as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .header("x-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(value["saved"].as_array().unwrap().len(), 1);
    assert!(value["duplicates"].as_array().unwrap().is_empty());
    assert!(value["failed"].as_array().unwrap().is_empty());

    let saved_path = value["saved"][0].as_str().unwrap();
    assert!(dir.path().join(saved_path).exists());
}

#[tokio::test]
async fn save_same_author_and_post_twice_creates_two_items() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_image_server().await;
    let signer = RequestSigner::new(HMAC_KEY);
    let app = create_router(test_state(dir.path()).await);

    let request = |image: &str| {
        serde_json::json!({
            "author": "alice",
            "postId": "p1",
            "images": [image],
        })
        .to_string()
    };

    for image in [format!("http://{addr}/a.jpg"), format!("http://{addr}/b.jpg")] {
        let body = request(&image);
        let signature = signer.sign(body.as_bytes());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/save")
                    .header("content-type", "application/json")
                    .header("x-signature", signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/items?page=1&page_size=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["total"], 2);
}

#[tokio::test]
async fn save_reports_byte_identical_content_as_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_image_server().await;
    let signer = RequestSigner::new(HMAC_KEY);
    let app = create_router(test_state(dir.path()).await);

    let first = serde_json::json!({
        "author": "alice",
        "postId": "p1",
        "images": [format!("http://{addr}/a.jpg")],
    })
    .to_string();
    let first_signature = signer.sign(first.as_bytes());
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .header("x-signature", first_signature)
                .body(Body::from(first))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let second = serde_json::json!({
        "author": "bob",
        "postId": "p9",
        "images": [format!("http://{addr}/a-again.jpg")],
    })
    .to_string();
    let second_signature = signer.sign(second.as_bytes());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save")
                .header("content-type", "application/json")
                .header("x-signature", second_signature)
                .body(Body::from(second))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value["saved"].as_array().unwrap().is_empty());
    assert_eq!(value["duplicates"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn items_endpoint_paginates_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path()).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/items?page=1&page_size=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["total"], 0);
    assert!(value["items"].as_array().unwrap().is_empty());
}
