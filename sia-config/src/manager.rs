use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::model::SiaConfig;

/// Opaque handle returned by [`ConfigManager::add_listener`], used to
/// unregister the listener later. Handles are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&SiaConfig) + Send + Sync>;

struct State {
    config: SiaConfig,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Owns the durable [`SiaConfig`] and notifies registered listeners whenever
/// it changes. A single instance is constructed in `main()` and shared via
/// `Arc` — there is no hidden global config state.
pub struct ConfigManager {
    path: PathBuf,
    state: RwLock<State>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .finish()
    }
}

impl ConfigManager {
    /// Load configuration from `path`, materializing defaults on first run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            read_config(&path)?
        } else {
            let config = SiaConfig::default();
            write_config(&path, &config)?;
            info!(path = %path.display(), "materialized default config");
            config
        };

        Ok(Self {
            path,
            state: RwLock::new(State {
                config,
                listeners: Vec::new(),
            }),
            next_listener_id: AtomicU64::new(0),
        })
    }

    /// Load configuration from the conventional `~/.sia/config.yaml` path.
    pub fn load_default() -> Result<Self> {
        Self::load(crate::config_path())
    }

    pub fn get(&self) -> SiaConfig {
        self.state.read().expect("config lock poisoned").config.clone()
    }

    /// Persist `config` (or the currently held one, if `None`) and notify
    /// listeners. The write is atomic: temp file + rename.
    pub fn save(&self, config: Option<SiaConfig>) -> Result<()> {
        let mut guard = self.state.write().expect("config lock poisoned");
        if let Some(config) = config {
            guard.config = config;
        }
        write_config(&self.path, &guard.config)?;
        for (_, listener) in &guard.listeners {
            listener(&guard.config);
        }
        Ok(())
    }

    /// Apply `mutate` to a clone of the current config and save the result.
    pub fn update(&self, mutate: impl FnOnce(&mut SiaConfig)) -> Result<SiaConfig> {
        let mut updated = self.get();
        mutate(&mut updated);
        self.save(Some(updated.clone()))?;
        Ok(updated)
    }

    /// Register a listener invoked after every successful [`Self::save`].
    /// Returns a handle usable with [`Self::remove_listener`].
    pub fn add_listener(
        &self,
        listener: impl Fn(&SiaConfig) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.state
            .write()
            .expect("config lock poisoned")
            .listeners
            .push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut guard = self.state.write().expect("config lock poisoned");
        if let Some(index) = guard.listeners.iter().position(|(existing, _)| *existing == id) {
            guard.listeners.remove(index);
        } else {
            warn!(?id, "remove_listener called with unknown handle");
        }
    }

    /// Hex SHA-256 of the config's canonical JSON serialization, so callers
    /// can cheaply detect whether the config has changed since they last saw it.
    pub fn signature(&self) -> Result<String> {
        signature_of(&self.get())
    }
}

fn signature_of(config: &SiaConfig) -> Result<String> {
    // BTreeMap round-trip so object keys are emitted in a stable (sorted)
    // order regardless of struct field declaration order.
    let value: std::collections::BTreeMap<String, serde_json::Value> =
        serde_json::from_value(serde_json::to_value(config).map_err(ConfigError::Signature)?)
            .map_err(ConfigError::Signature)?;
    let canonical = serde_json::to_vec(&value).map_err(ConfigError::Signature)?;
    Ok(hex::encode(Sha256::digest(canonical)))
}

fn read_config(path: &Path) -> Result<SiaConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_config(path: &Path, config: &SiaConfig) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    fs::create_dir_all(&config.log_dir).map_err(|source| ConfigError::Write {
        path: config.log_dir.clone(),
        source,
    })?;

    let rendered = serde_yaml::to_string(config).map_err(ConfigError::Serialize)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config.yaml")
    ));
    fs::write(&tmp_path, rendered).map_err(|source| ConfigError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
