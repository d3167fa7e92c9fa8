//! Archival pipeline for the sia image-archiver daemon.
//!
//! Owns the pieces downstream of configuration: the metadata store, the
//! strict downloader, the folder/file naming engine, the derived gallery
//! index, the filesystem watcher, and request-signing primitives.

pub mod auth;
pub mod db;
pub mod downloader;
pub mod error;
pub mod gallery;
pub mod naming;
pub mod watcher;

pub use auth::RequestSigner;
pub use db::{Asset, FileRow, FileWithProvenance, Item, MetadataStore};
pub use downloader::{DownloadOutcome, Downloader};
pub use error::{CoreError, Result};
pub use gallery::{GalleryEntry, GalleryIndexer};
pub use naming::{ConflictPolicy, ExifReader, NamingEngine, NoExif, SortMode};
pub use watcher::Watcher;
