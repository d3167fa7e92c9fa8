use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the archival pipeline. Request authentication and
/// body-shape validation happen at the HTTP boundary, before any core
/// operation runs, so those failure modes never need a core representation.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("content type {found:?} is not allowed")]
    TypeNotAllowed { found: Option<String> },

    #[error("download failed (retryable): {0}")]
    DownloadTransient(String),

    #[error("download failed after retries exhausted: {0}")]
    DownloadPermanent(String),

    #[error("name already taken at commit time for {0}")]
    FilesystemRace(PathBuf),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
