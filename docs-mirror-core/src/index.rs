//! Index reconciliation against the remote backend.
//!
//! Config is the only source of truth for which stores may exist:
//!   - stores whose display name is not a configured id are deleted
//!   - display names with more than one store are deleted and rebuilt
//!   - planned stores are replaced wholesale (delete, create, upload everything)
//!
//! Stores are never patched incrementally. Per-file upload failures degrade the
//! store's file count but not its status; only a failed create or a missing
//! directory fails the store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::contract::{FileUpload, IndexBackend, RemoteStoreHandle, UploadOperation};
use crate::exclusion::ExclusionPolicy;
use crate::state::IndexStatus;
use crate::tree::META_FILENAME;

/// File extensions the backend indexes (lowercase, without the dot).
pub const SUPPORTED_EXTENSIONS: [&str; 11] = [
    "md", "mdx", "txt", "py", "js", "json", "ts", "tsx", "jsx", "rst", "pdf",
];

/// Indexing price used for the cost estimate, USD per million tokens.
pub const COST_PER_MILLION_TOKENS: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub store_concurrency: usize,
    pub upload_concurrency: usize,
    pub poll_interval: Duration,
    /// Upper bound on waiting for upload operations of one store.
    pub max_wait: Duration,
    /// Pause after deleting a store before re-creating it.
    pub settle_delay: Duration,
    pub min_file_size: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            store_concurrency: 10,
            upload_concurrency: 10,
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(600),
            settle_delay: Duration::from_secs(2),
            min_file_size: 10,
        }
    }
}

/// Result of rebuilding one store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    pub id: String,
    pub status: IndexStatus,
    /// Uploads accepted by the backend.
    pub files: u64,
    pub cost: f64,
    pub failed_uploads: usize,
    /// Accepted uploads that finished processing before the wait ended.
    pub completed: usize,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl StoreOutcome {
    fn failed(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: IndexStatus::Failed,
            files: 0,
            cost: 0.0,
            failed_uploads: 0,
            completed: 0,
            timed_out: false,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IndexStatus::Success
    }
}

/// Everything an [`IndexReconciler::apply`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRun {
    pub results: BTreeMap<String, StoreOutcome>,
    /// Display names deleted because config no longer declares them.
    pub deleted_orphans: Vec<String>,
    /// Valid display names that had duplicate stores and were force-rebuilt.
    pub healed_duplicates: Vec<String>,
}

/// Files selected for upload from a store directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileSelection {
    pub files: Vec<PathBuf>,
    pub skipped: usize,
}

/// Size and name rules applied after the dotfile and exclusion checks.
pub fn should_index_file(path: &Path, size: u64, min_file_size: u64) -> bool {
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()));
    if !supported || size < min_file_size {
        return false;
    }
    // Near-empty package markers carry nothing worth indexing.
    !(path.file_name().is_some_and(|n| n == "__init__.py") && size < 100)
}

/// Walks a store directory and picks the files to upload.
pub fn select_files(dir: &Path, policy: &ExclusionPolicy, min_file_size: u64) -> FileSelection {
    let mut selection = FileSelection::default();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name == META_FILENAME {
            selection.skipped += 1;
            continue;
        }
        let Some(rel) = relative_posix(dir, entry.path()) else {
            selection.skipped += 1;
            continue;
        };
        if policy.is_excluded(&rel) {
            selection.skipped += 1;
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if should_index_file(entry.path(), size, min_file_size) {
            selection.files.push(entry.path().to_path_buf());
        } else {
            selection.skipped += 1;
        }
    }
    selection
}

/// A walk that panicked fails the store instead of reading as an empty directory.
fn selection_or_failure(
    id: &str,
    joined: Result<FileSelection, tokio::task::JoinError>,
) -> Result<FileSelection, StoreOutcome> {
    joined.map_err(|e| {
        error!(store = %id, error = %e, "[INDEX][ERROR] File selection failed");
        StoreOutcome::failed(id, format!("file selection failed: {e}"))
    })
}

fn relative_posix(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("md") | Some("mdx") => "text/markdown",
        Some("py") => "text/x-python",
        Some("js") | Some("jsx") => "text/javascript",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
}

/// Directory of a store: `<root>/<owner>/<repo>`.
pub fn store_dir(root: &Path, id: &str) -> PathBuf {
    id.split('/').fold(root.to_path_buf(), |dir, part| dir.join(part))
}

pub fn estimate_cost(tokens: u64) -> f64 {
    (tokens as f64 / 1_000_000.0) * COST_PER_MILLION_TOKENS
}

pub struct IndexReconciler<'a, B> {
    backend: &'a B,
    root: &'a Path,
    policy: &'a ExclusionPolicy,
    settings: &'a IndexSettings,
}

impl<'a, B> IndexReconciler<'a, B>
where
    B: IndexBackend,
{
    pub fn new(
        backend: &'a B,
        root: &'a Path,
        policy: &'a ExclusionPolicy,
        settings: &'a IndexSettings,
    ) -> Self {
        Self {
            backend,
            root,
            policy,
            settings,
        }
    }

    /// Cleans up the remote namespace and rebuilds every planned store.
    pub async fn apply(
        &self,
        planned: &BTreeSet<String>,
        valid: &BTreeSet<String>,
        parallel: bool,
    ) -> IndexRun {
        let mut run = IndexRun::default();

        let mut by_display: BTreeMap<String, Vec<RemoteStoreHandle>> = BTreeMap::new();
        match self.backend.list_stores().await {
            Ok(handles) => {
                info!(count = handles.len(), "[INDEX] Found existing stores");
                for handle in handles {
                    if let Some(display) = handle.display_name.clone().filter(|d| !d.is_empty()) {
                        by_display.entry(display).or_default().push(handle);
                    }
                }
            }
            Err(e) => warn!(
                error = %e,
                "[INDEX] Could not list stores, continuing without cleanup"
            ),
        }

        let orphans: Vec<String> = by_display
            .keys()
            .filter(|name| !valid.contains(*name))
            .cloned()
            .collect();
        for name in orphans {
            let handles = by_display.remove(&name).unwrap_or_default();
            info!(store = %name, handles = handles.len(), "[INDEX] Deleting stale store");
            self.delete_all(&name, &handles).await;
            run.deleted_orphans.push(name);
        }

        for (name, handles) in by_display.iter_mut() {
            if handles.len() > 1 {
                warn!(
                    store = %name,
                    duplicates = handles.len(),
                    "[INDEX] Duplicate stores found; deleting and rebuilding"
                );
                self.delete_all(name, handles).await;
                handles.clear();
                run.healed_duplicates.push(name.clone());
            }
        }

        let mut targets: BTreeSet<String> = planned.clone();
        targets.extend(run.healed_duplicates.iter().cloned());

        let limit = if parallel {
            self.settings.store_concurrency.max(1)
        } else {
            1
        };
        info!(stores = targets.len(), concurrency = limit, "[INDEX] Syncing stores");

        let by_display = &by_display;
        run.results = stream::iter(targets)
            .map(|id| async move {
                let existing = by_display.get(&id).cloned().unwrap_or_default();
                let outcome = self.rebuild_store(&id, existing).await;
                (id, outcome)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let updated = run.results.values().filter(|o| o.is_success()).count();
        info!(
            updated,
            planned = run.results.len(),
            files = run.results.values().map(|o| o.files).sum::<u64>(),
            "[INDEX] Store sync complete"
        );
        run
    }

    async fn delete_all(&self, name: &str, handles: &[RemoteStoreHandle]) {
        for handle in handles {
            if let Err(e) = self.backend.delete_store(handle).await {
                error!(
                    store = %name,
                    handle = %handle.name,
                    error = %e,
                    "[INDEX][ERROR] Failed to delete store"
                );
            }
        }
    }

    /// Replaces one store: delete old handles, create fresh, upload, wait.
    pub async fn rebuild_store(&self, id: &str, existing: Vec<RemoteStoreHandle>) -> StoreOutcome {
        let dir = store_dir(self.root, id);
        if !dir.is_dir() {
            warn!(store = %id, dir = %dir.display(), "[INDEX] Store directory does not exist");
            return StoreOutcome::failed(id, "Directory not found");
        }

        if !existing.is_empty() {
            self.delete_all(id, &existing).await;
            if !self.settings.settle_delay.is_zero() {
                tokio::time::sleep(self.settings.settle_delay).await;
            }
        }

        let store = match self.backend.create_store(id).await {
            Ok(store) => {
                info!(store = %id, handle = %store.name, "[INDEX] Created store");
                store
            }
            Err(e) => {
                error!(store = %id, error = %e, "[INDEX][ERROR] Failed to create store");
                return StoreOutcome::failed(id, e.to_string());
            }
        };

        let joined = {
            let dir = dir.clone();
            let policy = self.policy.clone();
            let min = self.settings.min_file_size;
            tokio::task::spawn_blocking(move || select_files(&dir, &policy, min)).await
        };
        let selection = match selection_or_failure(id, joined) {
            Ok(selection) => selection,
            Err(outcome) => return outcome,
        };
        info!(
            store = %id,
            files = selection.files.len(),
            skipped = selection.skipped,
            "[INDEX] Files to upload"
        );

        let mut outcome = StoreOutcome {
            id: id.to_string(),
            status: IndexStatus::Success,
            files: 0,
            cost: 0.0,
            failed_uploads: 0,
            completed: 0,
            timed_out: false,
            error: None,
        };
        if selection.files.is_empty() {
            return outcome;
        }

        let transcode_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!(
                    store = %id,
                    error = %e,
                    "[INDEX][ERROR] Could not create temporary directory"
                );
                return StoreOutcome::failed(id, e.to_string());
            }
        };

        let results: Vec<Result<(UploadOperation, u64), String>> = stream::iter(selection.files)
            .map(|file| {
                let store = &store;
                let dir = &dir;
                let transcode_dir = &transcode_dir;
                async move { self.upload_one(store, dir, transcode_dir, &file).await }
            })
            .buffer_unordered(self.settings.upload_concurrency.max(1))
            .collect()
            .await;

        let mut operations = Vec::new();
        let mut tokens = 0u64;
        for result in results {
            match result {
                Ok((operation, estimate)) => {
                    operations.push(operation);
                    tokens += estimate;
                }
                Err(message) => {
                    outcome.failed_uploads += 1;
                    if outcome.failed_uploads <= 3 {
                        warn!(store = %id, error = %message, "[INDEX] Upload failed");
                    }
                }
            }
        }

        let (completed, timed_out) = self.wait_for(id, &mut operations).await;
        outcome.files = operations.len() as u64;
        outcome.cost = estimate_cost(tokens);
        outcome.completed = completed;
        outcome.timed_out = timed_out;

        info!(
            store = %id,
            files = outcome.files,
            tokens,
            cost = outcome.cost,
            failed_uploads = outcome.failed_uploads,
            "[INDEX] Store rebuilt"
        );
        outcome
    }

    async fn upload_one(
        &self,
        store: &RemoteStoreHandle,
        store_dir: &Path,
        transcode_dir: &TempDir,
        file: &Path,
    ) -> Result<(UploadOperation, u64), String> {
        let display_name = relative_posix(store_dir, file)
            .ok_or_else(|| format!("{} outside store", file.display()))?;

        let is_mdx = file
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("mdx"));
        let upload_path = if is_mdx {
            // Uploaded as markdown so the backend parses it; identity keeps the .mdx path.
            let target = transcode_dir.path().join(&display_name).with_extension("md");
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("{display_name}: {e}"))?;
            }
            tokio::fs::copy(file, &target)
                .await
                .map_err(|e| format!("{display_name}: {e}"))?;
            target
        } else {
            file.to_path_buf()
        };

        let size = tokio::fs::metadata(&upload_path)
            .await
            .map_err(|e| format!("{display_name}: {e}"))?
            .len();
        let upload = FileUpload {
            mime_type: mime_type(&upload_path),
            path: upload_path,
            display_name,
        };
        let operation = self
            .backend
            .upload_file(store, &upload)
            .await
            .map_err(|e| format!("{}: {e}", upload.display_name))?;
        debug!(file = %upload.display_name, operation = %operation.name, "[INDEX] Upload queued");
        Ok((operation, size / 4))
    }

    /// Polls until all operations are done or `max_wait` elapses. Returns (completed, timed_out).
    ///
    /// Each poll is bounded by the time left, so a backend that never answers
    /// cannot hold the store past `max_wait`.
    async fn wait_for(&self, id: &str, operations: &mut [UploadOperation]) -> (usize, bool) {
        let total = operations.len();
        let start = Instant::now();
        loop {
            let completed = operations.iter().filter(|op| op.done).count();
            if completed == total {
                return (completed, false);
            }
            if start.elapsed() >= self.settings.max_wait {
                warn!(store = %id, completed, total, "[INDEX] Timeout waiting for uploads");
                return (completed, true);
            }

            let polled: Vec<(usize, UploadOperation)> = stream::iter(
                operations
                    .iter()
                    .enumerate()
                    .filter(|(_, op)| !op.done)
                    .map(|(i, op)| (i, op.clone())),
            )
            .map(|(i, op)| async move {
                let remaining = self.settings.max_wait.saturating_sub(start.elapsed());
                match tokio::time::timeout(remaining, self.backend.poll_operation(&op)).await {
                    Ok(Ok(refreshed)) => (i, refreshed),
                    Ok(Err(e)) => {
                        warn!(
                            store = %id,
                            operation = %op.name,
                            error = %e,
                            "[INDEX] Failed to poll operation"
                        );
                        (i, op)
                    }
                    Err(_) => {
                        debug!(store = %id, operation = %op.name, "[INDEX] Poll cut off");
                        (i, op)
                    }
                }
            })
            .buffer_unordered(self.settings.upload_concurrency.max(1))
            .collect()
            .await;
            for (i, op) in polled {
                operations[i] = op;
            }

            let now_completed = operations.iter().filter(|op| op.done).count();
            if now_completed > completed {
                debug!(store = %id, completed = now_completed, total, "[INDEX] Uploads completed");
            }
            if now_completed < total {
                let remaining = self.settings.max_wait.saturating_sub(start.elapsed());
                tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
            }
        }
    }
}
