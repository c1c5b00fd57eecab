//! Persisted reconciliation state (`.reference-sync`).
//!
//! The state document is the only memory carried between runs:
//!   - per mirror: the last synced revision, the branch/docsPath it was synced from, status
//!   - per store: the last index metrics (files, estimated cost, status)
//!   - globally: last sync time, revision of the controlling working tree, exclusion policy hash
//!
//! Older on-disk shapes are migrated by [`crate::migrate`] while loading, so nothing
//! downstream of [`StateStore::load`] ever sees them. Unparseable documents are
//! recovered as empty state with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::migrate::StateShape;
use crate::tree::write_atomic;

/// Outcome of the last mirror reconciliation for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorStatus {
    Success,
    Unchanged,
    Failed,
}

impl MirrorStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "unchanged" => Some(Self::Unchanged),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of the last index rebuild for a store. Unknown strings decode as `Absent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Success,
    Failed,
    #[default]
    Absent,
}

impl From<String> for IndexStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Absent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    #[serde(default)]
    pub files: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub synced: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_index_status")]
    pub status: IndexStatus,
}

impl IndexRecord {
    pub fn is_success(&self) -> bool {
        self.status == IndexStatus::Success
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorRecord {
    #[serde(default, alias = "commit")]
    pub revision: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub docs_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub synced: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_mirror_status")]
    pub status: Option<MirrorStatus>,
    #[serde(default, alias = "gemini")]
    pub index: Option<IndexRecord>,
}

impl MirrorRecord {
    pub fn has_successful_index(&self) -> bool {
        self.index.as_ref().is_some_and(IndexRecord::is_success)
    }
}

/// The persisted root document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationState {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, alias = "lastCommit")]
    pub last_revision: Option<String>,
    #[serde(default, alias = "geminiExclusionsHash")]
    pub exclusion_policy_hash: Option<String>,
    #[serde(default)]
    pub stores: BTreeMap<String, MirrorRecord>,
}

impl ReconciliationState {
    pub fn record(&self, id: &str) -> Option<&MirrorRecord> {
        self.stores.get(id)
    }

    /// Parses a state document of any known shape.
    pub fn from_json_str(raw: &str, path: &Path) -> Result<Self, StateError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| StateError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let shape = StateShape::detect(value).map_err(|message| StateError::Corrupt {
            path: path.to_path_buf(),
            message,
        })?;
        if !matches!(shape, StateShape::Current(_)) {
            info!(
                shape = shape.name(),
                path = %path.display(),
                "[STATE] Migrating legacy state document"
            );
        }
        Ok(shape.into_current())
    }
}

/// Current time at the second precision stored in state and provenance files.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Loads and persists [`ReconciliationState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state, falling back to an empty state when the file is missing or unusable.
    pub fn load(&self) -> ReconciliationState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "[STATE] No state file, starting fresh");
                return ReconciliationState::default();
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "[STATE] Could not read state file, starting with fresh state"
                );
                return ReconciliationState::default();
            }
        };
        match ReconciliationState::from_json_str(&raw, &self.path) {
            Ok(state) => {
                debug!(stores = state.stores.len(), "[STATE] Loaded state");
                state
            }
            Err(e) => {
                warn!(error = %e, "[STATE] Could not load state file, starting with fresh state");
                ReconciliationState::default()
            }
        }
    }

    /// Stamps the run metadata and writes the document atomically.
    pub fn save(
        &self,
        state: &mut ReconciliationState,
        controlling_revision: Option<String>,
    ) -> Result<(), StateError> {
        state.last_sync = Some(timestamp_now());
        state.last_revision = controlling_revision;
        let mut body = serde_json::to_string_pretty(state)?;
        body.push('\n');
        write_atomic(&self.path, body.as_bytes()).map_err(|e| StateError::io(&self.path, e))?;
        info!(path = %self.path.display(), stores = state.stores.len(), "[STATE] State saved");
        Ok(())
    }
}

pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn lenient_mirror_status<'de, D>(deserializer: D) -> Result<Option<MirrorStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(MirrorStatus::parse))
}

fn lenient_index_status<'de, D>(deserializer: D) -> Result<IndexStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(IndexStatus::from).unwrap_or_default())
}

/// Parses RFC 3339, tolerating the `+00:00Z` suffix older writers produced.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalised = raw.strip_suffix("+00:00Z").map(|s| format!("{s}Z"));
    let candidate = normalised.as_deref().unwrap_or(raw);
    DateTime::parse_from_rfc3339(candidate)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
