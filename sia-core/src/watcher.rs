use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, NoCache};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::db::MetadataStore;
use crate::gallery::GalleryIndexer;
use crate::naming::NamingEngine;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const IGNORED_DIRS: &[&str] = &["target", "node_modules", ".git", ".hg", ".svn", "@eadir"];
const STABILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STABILITY_MAX_POLLS: u32 = 3;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Watches `base_dir` for externally introduced files and folds them into
/// the canonical naming scheme.
pub struct Watcher {
    _inner: Debouncer<RecommendedWatcher, NoCache>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Start watching `base_dir`. The returned `Watcher` owns the background
    /// task; drop it (or call [`Watcher::shutdown`]) to stop watching.
    pub async fn start(
        base_dir: PathBuf,
        naming: Arc<NamingEngine>,
        store: Arc<MetadataStore>,
        gallery: Arc<GalleryIndexer>,
    ) -> notify::Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for de in events {
                        #[allow(deprecated)]
                        for path in stable_candidate_paths(&de.event) {
                            let _ = event_tx.send(path);
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("debouncer error: {e}");
                    }
                }
            },
        )
        .map_err(|e| notify::Error::new(notify::ErrorKind::Generic(e.to_string())))?;
        debouncer.watch(&base_dir, RecursiveMode::Recursive)?;

        let task = tokio::spawn(run_action_loop(event_rx, base_dir, naming, store, gallery));

        Ok(Self { _inner: debouncer, task })
    }

    /// Stop watching, waiting up to 5 seconds for in-flight actions to
    /// finish before aborting.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await;
    }
}

fn stable_candidate_paths(event: &Event) -> Vec<PathBuf> {
    let interesting = matches!(event.kind, EventKind::Create(_)) || is_move(event);
    if !interesting {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !should_ignore(p))
        .cloned()
        .collect()
}

fn is_move(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(notify::event::ModifyKind::Name(_)))
}

fn should_ignore(path: &Path) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(os) = component {
            if let Some(s) = os.to_str() {
                if s.starts_with('.') {
                    return true;
                }
                if IGNORED_DIRS.contains(&s.to_lowercase().as_str()) {
                    return true;
                }
            }
        }
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => true,
    }
}

async fn run_action_loop(
    mut event_rx: mpsc::UnboundedReceiver<PathBuf>,
    base_dir: PathBuf,
    naming: Arc<NamingEngine>,
    store: Arc<MetadataStore>,
    gallery: Arc<GalleryIndexer>,
) {
    let mut pending_folders: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();

    while let Some(path) = event_rx.recv().await {
        if !wait_for_stable_size(&path).await {
            debug!(path = %path.display(), "path vanished before stabilizing, dropping");
            continue;
        }

        let folder = if path.parent() == Some(base_dir.as_path()) {
            match adopt_loose_image(&path, &naming).await {
                Some(f) => f,
                None => continue,
            }
        } else {
            match path.parent() {
                Some(p) => p.to_path_buf(),
                None => continue,
            }
        };

        pending_folders.insert(folder);

        while let Ok(next) = event_rx.try_recv() {
            if let Some(parent) = next.parent() {
                pending_folders.insert(parent.to_path_buf());
            }
        }

        for folder in pending_folders.drain() {
            if let Err(e) = naming.normalize_folder(&folder).await {
                error!(folder = %folder.display(), error = %e, "normalize failed");
                continue;
            }
            if let Err(e) = reconcile_and_rebuild(&base_dir, &store, &gallery).await {
                error!(error = %e, "post-normalize reconcile/rebuild failed");
            }
        }
    }
}

async fn adopt_loose_image(path: &Path, naming: &NamingEngine) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let folder = match naming.resolve_author_folder(&stem).await {
        Ok(f) => f,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to resolve author folder for loose image");
            return None;
        }
    };
    let target = folder.join(path.file_name()?);
    if let Err(e) = tokio::fs::rename(path, &target).await {
        error!(path = %path.display(), error = %e, "failed to move loose image into folder");
        return None;
    }
    Some(folder)
}

async fn reconcile_and_rebuild(
    base_dir: &Path,
    store: &MetadataStore,
    gallery: &GalleryIndexer,
) -> crate::error::Result<()> {
    let existing = walk_relative_paths(base_dir).await?;
    store.reconcile(&existing).await?;
    gallery.rebuild(store).await?;
    Ok(())
}

async fn walk_relative_paths(base_dir: &Path) -> crate::error::Result<std::collections::HashSet<String>> {
    let mut stack = vec![base_dir.to_path_buf()];
    let mut found = std::collections::HashSet::new();

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                stack.push(path);
                continue;
            }
            if let Ok(rel) = path.strip_prefix(base_dir) {
                found.insert(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(found)
}

/// Poll a path's size at ~1 s intervals up to 3 times, requiring two
/// consecutive equal readings before declaring it stable. Returns `false`
/// if the path never stabilizes (e.g. it vanishes).
async fn wait_for_stable_size(path: &Path) -> bool {
    let mut last: Option<u64> = None;

    for _ in 0..STABILITY_MAX_POLLS {
        let size = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(_) => return false,
        };
        if last == Some(size) {
            return true;
        }
        last = Some(size);
        tokio::time::sleep(STABILITY_POLL_INTERVAL).await;
    }

    tokio::fs::metadata(path).await.is_ok() && last.is_some()
}
