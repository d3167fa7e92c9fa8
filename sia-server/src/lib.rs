//! HTTP surface for the sia image-archiver daemon: route handlers, the
//! per-request error mapping, and the shared application state they close
//! over. The `sia-server` binary (`main.rs`) wires this together with the
//! CLI and the daemon's startup sequence.

pub mod error;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use sia_config::ConfigManager;
use sia_core::{Downloader, GalleryIndexer, MetadataStore, NamingEngine, RequestSigner};

pub use error::ApiError;
pub use routes::create_router;

/// Shared handles threaded through every route. Cloning is cheap — every
/// field is an `Arc` or a value type backed by one.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigManager>,
    pub store: Arc<MetadataStore>,
    pub downloader: Arc<Downloader>,
    pub naming: Arc<NamingEngine>,
    pub gallery: Arc<GalleryIndexer>,
    pub signer: Arc<RequestSigner>,
    pub base_dir: PathBuf,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}
