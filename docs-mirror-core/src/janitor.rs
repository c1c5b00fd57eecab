//! Removal of state entries and mirror directories for sources no longer configured.
//!
//! Only directories carrying [`META_FILENAME`] are eligible: anything else under the
//! working tree was not created by this tool and is never touched.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::state::ReconciliationState;
use crate::tree::{has_provenance, META_FILENAME};

/// Top-level names of the working tree that never hold mirrors.
pub const RESERVED_DIRS: [&str; 7] = [
    ".git",
    ".github",
    "search-context",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "target",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub state_entries: Vec<String>,
    pub directories: Vec<String>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.state_entries.is_empty() && self.directories.is_empty()
    }
}

/// Drops state entries and managed directories whose id is not in `valid`.
pub fn purge(
    state: &mut ReconciliationState,
    valid: &BTreeSet<String>,
    root: &Path,
) -> PurgeReport {
    let mut report = PurgeReport::default();

    state.stores.retain(|id, _| {
        let keep = valid.contains(id);
        if !keep {
            report.state_entries.push(id.clone());
        }
        keep
    });
    if !report.state_entries.is_empty() {
        info!(removed = ?report.state_entries, "[STATE] Removed stale stores from state");
    }

    report.directories = purge_directories(valid, root);
    report
}

fn purge_directories(valid: &BTreeSet<String>, root: &Path) -> Vec<String> {
    let mut removed = Vec::new();
    let Ok(owners) = fs::read_dir(root) else {
        return removed;
    };

    let mut owner_dirs: Vec<_> = owners.flatten().map(|e| e.path()).collect();
    owner_dirs.sort();
    for owner_dir in owner_dirs {
        let Some(owner) = dir_name(&owner_dir) else {
            continue;
        };
        if !owner_dir.is_dir()
            || owner.starts_with('.')
            || RESERVED_DIRS.contains(&owner.as_str())
        {
            continue;
        }
        let Ok(repos) = fs::read_dir(&owner_dir) else {
            continue;
        };

        let mut repo_dirs: Vec<_> = repos.flatten().map(|e| e.path()).collect();
        repo_dirs.sort();
        let mut removed_here = false;
        for repo_dir in repo_dirs {
            let Some(repo) = dir_name(&repo_dir) else {
                continue;
            };
            if !repo_dir.is_dir() || repo.starts_with('.') || !has_provenance(&repo_dir) {
                continue;
            }
            let id = format!("{owner}/{repo}");
            if valid.contains(&id) {
                continue;
            }
            info!(mirror_id = %id, meta = META_FILENAME, "[STATE] Removing stale mirror directory");
            match fs::remove_dir_all(&repo_dir) {
                Ok(()) => {
                    removed.push(id);
                    removed_here = true;
                }
                Err(e) => warn!(
                    mirror_id = %id,
                    error = %e,
                    "Failed to remove stale mirror directory"
                ),
            }
        }

        if removed_here && fs::read_dir(&owner_dir).is_ok_and(|mut d| d.next().is_none()) {
            if let Err(e) = fs::remove_dir(&owner_dir) {
                warn!(
                    dir = %owner_dir.display(),
                    error = %e,
                    "Failed to remove empty owner directory"
                );
            }
        }
    }
    removed
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
