use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// How conflicting renames are resolved when a target name is already taken
/// at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the original name, suffixed `_keep<k>`.
    Skip,
    /// Append `_<k>` to the target name until one is free.
    Dedup,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Order in which loose files are assigned indices during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    Name,
    Mtime,
    ExifTakenAt,
}

impl Default for SortMode {
    fn default() -> Self {
        Self::Name
    }
}

/// A source of EXIF capture times, kept behind a trait so the naming engine
/// doesn't hard-depend on a particular decoding library. The default
/// implementation always reports unknown, which sends `SortMode::ExifTakenAt`
/// callers back to `mtime`.
pub trait ExifReader: Send + Sync {
    fn taken_at(&self, path: &Path) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Default)]
pub struct NoExif;

impl ExifReader for NoExif {
    fn taken_at(&self, _path: &Path) -> Option<DateTime<Utc>> {
        None
    }
}

fn safe_author(author: &str) -> String {
    author
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn folder_index_re() -> Regex {
    Regex::new(r"^(\d{5})_").unwrap()
}

fn folder_match_re(safe: &str) -> Regex {
    Regex::new(&format!(r"^\d{{5}}_{}$", regex::escape(safe))).unwrap()
}

fn file_index_re(folder: &str) -> Regex {
    Regex::new(&format!(r"^{}_(\d{{3}})$", regex::escape(folder))).unwrap()
}

/// Allocates author folders and file indices under `base_dir`, and normalizes
/// folders back to the canonical naming scheme.
pub struct NamingEngine {
    base_dir: PathBuf,
    folder_alloc_lock: Mutex<()>,
    per_folder_lock: DashMap<String, Arc<Mutex<()>>>,
    conflict_policy: ConflictPolicy,
    sort_mode: SortMode,
    exif: Arc<dyn ExifReader>,
}

impl std::fmt::Debug for NamingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingEngine")
            .field("base_dir", &self.base_dir)
            .field("conflict_policy", &self.conflict_policy)
            .field("sort_mode", &self.sort_mode)
            .finish()
    }
}

impl NamingEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_exif_reader(base_dir, Arc::new(NoExif))
    }

    pub fn with_exif_reader(base_dir: impl Into<PathBuf>, exif: Arc<dyn ExifReader>) -> Self {
        Self {
            base_dir: base_dir.into(),
            folder_alloc_lock: Mutex::new(()),
            per_folder_lock: DashMap::new(),
            conflict_policy: ConflictPolicy::default(),
            sort_mode: SortMode::default(),
            exif,
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = mode;
        self
    }

    fn folder_lock(&self, folder_name: &str) -> Arc<Mutex<()>> {
        self.per_folder_lock
            .entry(folder_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve (creating if necessary) the author folder for `author`.
    /// Idempotent: repeated calls for the same author return the same path.
    pub async fn resolve_author_folder(&self, author: &str) -> Result<PathBuf> {
        let safe = safe_author(author);
        let matcher = folder_match_re(&safe);

        let _guard = self.folder_alloc_lock.lock().await;

        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| CoreError::io(&self.base_dir, e))?;

        let mut max_index = 0u32;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&self.base_dir, e))?
        {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if matcher.is_match(&name) {
                return Ok(self.base_dir.join(name.as_ref()));
            }
            if let Some(cap) = folder_index_re().captures(&name) {
                if let Ok(n) = cap[1].parse::<u32>() {
                    max_index = max_index.max(n);
                }
            }
        }

        let next = max_index + 1;
        let folder_name = format!("{next:05}_{safe}");
        let path = self.base_dir.join(&folder_name);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        Ok(path)
    }

    /// Reserve `count` consecutive file indices within `folder`, returning
    /// them in ascending order. Pre-creates empty placeholder files at the
    /// reserved names so the lock can be released before downloads start.
    pub async fn reserve_indices(&self, folder: &Path, count: u32) -> Result<Vec<u32>> {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::InvalidInput(format!("{} has no basename", folder.display())))?;

        let lock = self.folder_lock(&folder_name);
        let _guard = lock.lock().await;

        let matcher = file_index_re(&folder_name);
        let mut entries = tokio::fs::read_dir(folder)
            .await
            .map_err(|e| CoreError::io(folder, e))?;

        let mut max_index = 0u32;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(folder, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = Path::new(name.as_ref())
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(cap) = matcher.captures(&stem) {
                if let Ok(n) = cap[1].parse::<u32>() {
                    max_index = max_index.max(n);
                }
            }
        }

        let indices: Vec<u32> = (1..=count).map(|i| max_index + i).collect();
        for &idx in &indices {
            let placeholder = folder.join(format!("{folder_name}_{idx:03}.part-reserved"));
            tokio::fs::File::create(&placeholder)
                .await
                .map_err(|e| CoreError::io(&placeholder, e))?;
        }
        Ok(indices)
    }

    /// Remove the placeholder created by [`reserve_indices`] once the real
    /// file has been placed (or the reservation was abandoned).
    pub async fn release_placeholder(&self, folder: &Path, index: u32) -> Result<()> {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let placeholder = folder.join(format!("{folder_name}_{index:03}.part-reserved"));
        match tokio::fs::remove_file(&placeholder).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::io(placeholder, e)),
        }
    }

    /// Rename every non-conforming file in `folder` to the canonical scheme,
    /// preserving indices already in use. Idempotent: a second pass over an
    /// already-normalized folder is a no-op.
    pub async fn normalize_folder(&self, folder: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::InvalidInput(format!("{} has no basename", folder.display())))?;

        let lock = self.folder_lock(&folder_name);
        let _guard = lock.lock().await;

        let matcher = file_index_re(&folder_name);
        let mut conforming_max = 0u32;
        let mut stray = Vec::new();

        let mut entries = tokio::fs::read_dir(folder)
            .await
            .map_err(|e| CoreError::io(folder, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(folder, e))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(".part-reserved") || name.ends_with(".part") {
                continue;
            }
            let stem = Path::new(&name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(cap) = matcher.captures(&stem) {
                if let Ok(n) = cap[1].parse::<u32>() {
                    conforming_max = conforming_max.max(n);
                    continue;
                }
            }
            let path = entry.path();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| CoreError::io(&path, e))?;
            stray.push((path, metadata));
        }

        if stray.is_empty() {
            return Ok(Vec::new());
        }

        match self.sort_mode {
            SortMode::Name => stray.sort_by(|a, b| a.0.cmp(&b.0)),
            SortMode::Mtime => stray.sort_by_key(|(_, m)| m.modified().ok()),
            SortMode::ExifTakenAt => {
                let exif = self.exif.clone();
                stray.sort_by_key(|(p, m)| {
                    exif.taken_at(p)
                        .map(|t| t.timestamp_nanos_opt().unwrap_or(0))
                        .or_else(|| {
                            m.modified()
                                .ok()
                                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                                .map(|d| d.as_nanos() as i64)
                        })
                        .unwrap_or(0)
                });
            }
        }

        let mut renames = Vec::new();
        let mut next_index = conforming_max + 1;
        for (path, _) in stray {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let target_name = if ext.is_empty() {
                format!("{folder_name}_{next_index:03}")
            } else {
                format!("{folder_name}_{next_index:03}.{ext}")
            };
            let target = folder.join(&target_name);

            let tmp = folder.join(format!(".__renametmp__{}", next_index));
            tokio::fs::rename(&path, &tmp)
                .await
                .map_err(|e| CoreError::io(&path, e))?;

            let final_target = self.resolve_conflict(folder, &target).await?;
            tokio::fs::rename(&tmp, &final_target)
                .await
                .map_err(|e| CoreError::io(&tmp, e))?;

            debug!(from = %path.display(), to = %final_target.display(), "normalized file");
            renames.push((path, final_target));
            next_index += 1;
        }

        Ok(renames)
    }

    async fn resolve_conflict(&self, folder: &Path, target: &Path) -> Result<PathBuf> {
        if !target.exists() {
            return Ok(target.to_path_buf());
        }

        match self.conflict_policy {
            ConflictPolicy::Skip => {
                let stem = target
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = target.extension().map(|e| e.to_string_lossy().into_owned());
                for k in 1.. {
                    let name = match &ext {
                        Some(ext) => format!("{stem}_keep{k}.{ext}"),
                        None => format!("{stem}_keep{k}"),
                    };
                    let candidate = folder.join(name);
                    if !candidate.exists() {
                        warn!(target = %target.display(), kept_as = %candidate.display(), "conflict, keeping original under suffix");
                        return Ok(candidate);
                    }
                }
                unreachable!()
            }
            ConflictPolicy::Dedup => {
                let stem = target
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = target.extension().map(|e| e.to_string_lossy().into_owned());
                for k in 1.. {
                    let name = match &ext {
                        Some(ext) => format!("{stem}_{k}.{ext}"),
                        None => format!("{stem}_{k}"),
                    };
                    let candidate = folder.join(name);
                    if !candidate.exists() {
                        return Ok(candidate);
                    }
                }
                unreachable!()
            }
        }
    }

    /// Rename a directory not matching `^\d{5}_` into the canonical
    /// `NNNNN_<basename>` form, stripping any leading numeric prefixes first.
    pub async fn adopt_unnumbered_folder(&self, folder: &Path) -> Result<PathBuf> {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::InvalidInput(format!("{} has no basename", folder.display())))?;

        if folder_index_re().is_match(&name) {
            return Ok(folder.to_path_buf());
        }

        let stripped = strip_leading_numeric_prefixes(&name);

        let _guard = self.folder_alloc_lock.lock().await;
        let parent = folder.parent().unwrap_or(&self.base_dir);
        let mut entries = tokio::fs::read_dir(parent)
            .await
            .map_err(|e| CoreError::io(parent, e))?;
        let mut max_index = 0u32;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(parent, e))?
        {
            let n = entry.file_name();
            if let Some(cap) = folder_index_re().captures(n.to_string_lossy().as_ref()) {
                if let Ok(n) = cap[1].parse::<u32>() {
                    max_index = max_index.max(n);
                }
            }
        }

        let next = max_index + 1;
        let new_name = format!("{next:05}_{stripped}");
        let new_path = parent.join(new_name);
        tokio::fs::rename(folder, &new_path)
            .await
            .map_err(|e| CoreError::io(folder, e))?;
        Ok(new_path)
    }
}

fn strip_leading_numeric_prefixes(name: &str) -> String {
    let re = Regex::new(r"^(\d{5}_)+").unwrap();
    re.replace(name, "").into_owned()
}
