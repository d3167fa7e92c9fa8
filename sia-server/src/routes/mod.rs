mod read;
mod save;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/save", axum::routing::post(save::save_handler))
        .route("/healthz", get(save::healthz))
        .route("/images.json", get(read::images_json))
        .route("/api/items", get(read::items_handler))
        .route("/{*path}", get(read::serve_file))
        .with_state(state)
}
