//! Detection and migration of historical state document shapes.
//!
//! Two legacy layouts exist besides the current one:
//!   - flat: `{"mirrors": {id: {lastCommit, lastSync, status}}, "gemini_stores": {id: {files, cost, lastSync, status}}}`
//!   - owner-grouped: `{"owners": {owner: {"mirrors": {repo: {commit, synced, status}}, "gemini": {...}}}}`
//!
//! Revision, status and index metrics carry over. Branch and docsPath were never
//! recorded by those layouts, so they stay empty and the next run resyncs once.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::state::{
    parse_timestamp, IndexRecord, IndexStatus, MirrorRecord, MirrorStatus, ReconciliationState,
};

#[derive(Debug)]
pub enum StateShape {
    Current(ReconciliationState),
    FlatLegacy(FlatLegacy),
    OwnerGrouped(OwnerGrouped),
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlatLegacy {
    #[serde(default, rename = "lastSync")]
    last_sync: Option<String>,
    #[serde(default, rename = "lastCommit")]
    last_commit: Option<String>,
    #[serde(default)]
    mirrors: BTreeMap<String, FlatMirror>,
    #[serde(default)]
    gemini_stores: BTreeMap<String, LegacyIndex>,
}

#[derive(Debug, Default, Deserialize)]
struct FlatMirror {
    #[serde(default, rename = "lastCommit")]
    last_commit: Option<String>,
    #[serde(default, rename = "lastSync")]
    last_sync: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnerGrouped {
    #[serde(default, rename = "lastSync")]
    last_sync: Option<String>,
    #[serde(default, rename = "lastCommit")]
    last_commit: Option<String>,
    #[serde(default)]
    owners: BTreeMap<String, OwnerEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnerEntry {
    #[serde(default)]
    mirrors: BTreeMap<String, OwnerMirror>,
    #[serde(default)]
    gemini: Option<LegacyIndex>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnerMirror {
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    synced: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct LegacyIndex {
    #[serde(default)]
    files: Option<u64>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default, rename = "lastSync", alias = "synced")]
    last_sync: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl LegacyIndex {
    fn into_record(self) -> IndexRecord {
        IndexRecord {
            files: self.files.unwrap_or(0),
            cost: self.cost.unwrap_or(0.0),
            synced: self.last_sync.as_deref().and_then(parse_timestamp),
            status: self.status.map(IndexStatus::from).unwrap_or_default(),
        }
    }
}

impl StateShape {
    /// Classifies a parsed document by its top-level keys.
    pub fn detect(value: Value) -> Result<Self, String> {
        let Value::Object(map) = &value else {
            return Err("state document must be a JSON object".into());
        };
        let has = |key: &str| map.contains_key(key);

        if has("stores") && !has("mirrors") && !has("gemini_stores") {
            return serde_json::from_value(value)
                .map(StateShape::Current)
                .map_err(|e| e.to_string());
        }
        if has("mirrors") || has("gemini_stores") {
            return serde_json::from_value(value)
                .map(StateShape::FlatLegacy)
                .map_err(|e| e.to_string());
        }
        if has("owners") {
            return serde_json::from_value(value)
                .map(StateShape::OwnerGrouped)
                .map_err(|e| e.to_string());
        }
        Ok(StateShape::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateShape::Current(_) => "current",
            StateShape::FlatLegacy(_) => "flat-mirrors",
            StateShape::OwnerGrouped(_) => "owner-grouped",
            StateShape::Unknown => "unknown",
        }
    }

    pub fn into_current(self) -> ReconciliationState {
        match self {
            StateShape::Current(state) => state,
            StateShape::FlatLegacy(flat) => migrate_flat(flat),
            StateShape::OwnerGrouped(grouped) => migrate_owner_grouped(grouped),
            StateShape::Unknown => {
                tracing::warn!("[STATE] Unrecognised state document, starting with fresh state");
                ReconciliationState::default()
            }
        }
    }
}

fn migrate_flat(mut flat: FlatLegacy) -> ReconciliationState {
    let mut ids: Vec<String> = flat.mirrors.keys().cloned().collect();
    ids.extend(flat.gemini_stores.keys().cloned());

    let mut stores = BTreeMap::new();
    for id in ids {
        if stores.contains_key(&id) {
            continue;
        }
        let mirror = flat.mirrors.remove(&id).unwrap_or_default();
        let index = flat.gemini_stores.remove(&id).map(LegacyIndex::into_record);
        stores.insert(
            id,
            MirrorRecord {
                revision: mirror.last_commit,
                branch: None,
                docs_path: None,
                synced: mirror.last_sync.as_deref().and_then(parse_timestamp),
                status: mirror.status.as_deref().and_then(MirrorStatus::parse),
                index,
            },
        );
    }

    ReconciliationState {
        last_sync: flat.last_sync.as_deref().and_then(parse_timestamp),
        last_revision: flat.last_commit,
        exclusion_policy_hash: None,
        stores,
    }
}

fn migrate_owner_grouped(grouped: OwnerGrouped) -> ReconciliationState {
    let mut stores = BTreeMap::new();
    for (owner, entry) in grouped.owners {
        for (repo, mirror) in entry.mirrors {
            stores.insert(
                format!("{owner}/{repo}"),
                MirrorRecord {
                    revision: mirror.commit,
                    branch: None,
                    docs_path: None,
                    synced: mirror.synced.as_deref().and_then(parse_timestamp),
                    status: mirror.status.as_deref().and_then(MirrorStatus::parse),
                    index: entry.gemini.clone().map(LegacyIndex::into_record),
                },
            );
        }
    }

    ReconciliationState {
        last_sync: grouped.last_sync.as_deref().and_then(parse_timestamp),
        last_revision: grouped.last_commit,
        exclusion_policy_hash: None,
        stores,
    }
}
