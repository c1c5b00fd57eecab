//! Local mirror tree operations: content-for-content replacement and provenance metadata.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::MirrorSource;
use crate::state::{lenient_timestamp, timestamp_now};

/// Provenance file written into every mirror directory this tool manages.
pub const META_FILENAME: &str = ".mirror-meta.json";

/// Which upstream revision a mirror directory reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub docs_path: String,
    #[serde(alias = "sourceCommit")]
    pub source_revision: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Provenance {
    pub fn new(source: &MirrorSource, revision: &str) -> Self {
        Self {
            owner: source.owner.clone(),
            repo: source.repo.clone(),
            branch: source.branch.clone(),
            docs_path: source.docs_path.clone(),
            source_revision: revision.to_string(),
            synced_at: Some(timestamp_now()),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Writes the provenance file for `dest`.
pub fn write_provenance(dest: &Path, provenance: &Provenance) -> io::Result<()> {
    let mut body = serde_json::to_string_pretty(provenance).map_err(io::Error::other)?;
    body.push('\n');
    write_atomic(&dest.join(META_FILENAME), body.as_bytes())
}

/// Reads the provenance file of a mirror directory, if it has a readable one.
pub fn read_provenance(dir: &Path) -> Option<Provenance> {
    let raw = fs::read_to_string(dir.join(META_FILENAME)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(error = %e, dir = %dir.display(), "Unreadable provenance metadata");
            None
        }
    }
}

pub fn has_provenance(dir: &Path) -> bool {
    dir.join(META_FILENAME).is_file()
}

/// Write-to-temp-then-rename in the target's directory.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Result of a [`replace_tree`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub copied: usize,
    pub removed: usize,
}

/// Makes `dest` hold exactly the files of `src`.
///
/// Added and modified files are overwritten, files absent from `src` are deleted,
/// directories left empty are removed. [`META_FILENAME`] is never deleted.
pub fn replace_tree(src: &Path, dest: &Path) -> io::Result<ReplaceSummary> {
    fs::create_dir_all(dest)?;
    let mut tracked: HashSet<PathBuf> = HashSet::new();
    let mut summary = ReplaceSummary::default();

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?
            .to_path_buf();
        let target = dest.join(&rel);
        if entry.file_type().is_dir() {
            if target.is_file() {
                fs::remove_file(&target)?;
            }
            fs::create_dir_all(&target)?;
            continue;
        }
        if target.is_dir() {
            fs::remove_dir_all(&target)?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        tracked.insert(rel);
        summary.copied += 1;
    }

    // Children before parents, so emptied directories can be removed in the same pass.
    for entry in WalkDir::new(dest).min_depth(1).contents_first(true) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_name() == META_FILENAME {
            continue;
        }
        let rel = entry.path().strip_prefix(dest).map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            if fs::read_dir(entry.path())?.next().is_none() {
                fs::remove_dir(entry.path())?;
            }
        } else if !tracked.contains(rel) {
            fs::remove_file(entry.path())?;
            summary.removed += 1;
        }
    }

    debug!(
        src = %src.display(),
        dest = %dest.display(),
        copied = summary.copied,
        removed = summary.removed,
        "Replaced mirror tree"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn replace_removes_stale_files_but_keeps_provenance() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write(&src.path().join("guide/intro.md"), "new intro");
        write(&src.path().join("index.md"), "index");
        write(&dest.path().join("guide/intro.md"), "old intro");
        write(&dest.path().join("old/gone.md"), "stale");
        write(&dest.path().join(META_FILENAME), "{}");

        let summary = replace_tree(src.path(), dest.path()).unwrap();

        assert_eq!(summary.copied, 2);
        assert_eq!(summary.removed, 1);
        assert_eq!(
            fs::read_to_string(dest.path().join("guide/intro.md")).unwrap(),
            "new intro"
        );
        assert!(dest.path().join("index.md").exists());
        assert!(!dest.path().join("old").exists());
        assert!(dest.path().join(META_FILENAME).exists());
    }

    #[test]
    fn provenance_reads_historical_commit_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(META_FILENAME),
            r#"{"owner":"A","repo":"B","branch":"main","docsPath":"docs","sourceCommit":"abc123","syncedAt":"2024-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        let meta = read_provenance(dir.path()).unwrap();
        assert_eq!(meta.source_revision, "abc123");
        assert_eq!(meta.id(), "A/B");
        assert!(meta.synced_at.is_some());
    }

    #[test]
    fn provenance_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = MirrorSource::new("A", "B", "main", "docs/");
        let written = Provenance::new(&source, "def456");
        write_provenance(dir.path(), &written).unwrap();

        let raw = fs::read_to_string(dir.path().join(META_FILENAME)).unwrap();
        assert!(raw.contains("\"sourceRevision\": \"def456\""));
        assert_eq!(read_provenance(dir.path()), Some(written));
    }
}
