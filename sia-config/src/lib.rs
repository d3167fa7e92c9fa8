//! Durable configuration for the sia image-archiver daemon.
//!
//! Configuration lives as human-editable YAML at `~/.sia/config.yaml`.
//! [`ConfigManager`] owns the loaded value, persists updates atomically
//! (temp file + rename), and notifies registered listeners after each save.

mod error;
mod manager;
mod model;

pub use error::{ConfigError, Result};
pub use manager::{ConfigManager, ListenerId};
pub use model::{DownloadPolicy, SiaConfig};

use std::path::PathBuf;

/// `~/.sia` — parent of the config file, the default log directory, and
/// (historically) nothing else; `base_dir` is configured separately and
/// defaults to `~/SIA-Gallery`.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sia")
}

/// `~/.sia/config.yaml`
pub fn config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_materializes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        assert!(!path.exists());

        let manager = ConfigManager::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.get().port, 18080);
    }

    #[test]
    fn reload_round_trips_an_edited_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let manager = ConfigManager::load(&path).unwrap();
        manager.update(|c| c.port = 9999).unwrap();

        let reloaded = ConfigManager::load(&path).unwrap();
        assert_eq!(reloaded.get().port, 9999);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: 7000\n").unwrap();

        let manager = ConfigManager::load(&path).unwrap();
        let config = manager.get();
        assert_eq!(config.port, 7000);
        assert_eq!(config.concurrency, 2); // default
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: 7000\nsome_future_field: true\n").unwrap();

        let manager = ConfigManager::load(&path).unwrap();
        assert_eq!(manager.get().port, 7000);
    }

    #[test]
    fn listeners_fire_on_save_and_can_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load(dir.path().join("config.yaml")).unwrap();

        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handle = manager.add_listener(move |_| {
            calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        manager.update(|c| c.port = 1).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        manager.remove_listener(handle);
        manager.update(|c| c.port = 2).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn signature_changes_when_config_changes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load(dir.path().join("config.yaml")).unwrap();
        let before = manager.signature().unwrap();
        manager.update(|c| c.port = 55555).unwrap();
        let after = manager.signature().unwrap();
        assert_ne!(before, after);
    }
}
