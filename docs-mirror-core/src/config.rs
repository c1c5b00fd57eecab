use std::collections::BTreeSet;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Fields every mirror entry must declare.
const REQUIRED_FIELDS: [&str; 4] = ["owner", "repo", "branch", "docsPath"];

/// One mirrored documentation subtree, as declared in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSource {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub docs_path: String,
}

impl MirrorSource {
    pub fn new(owner: &str, repo: &str, branch: &str, docs_path: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            docs_path: docs_path.to_string(),
        }
    }

    /// The `owner/repo` identifier shared by the mirror, its state record and its store.
    pub fn id(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// The declarative configuration: mirror sources plus the index exclusion policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorsConfig {
    pub mirrors: Vec<MirrorSource>,
    #[serde(default, rename = "geminiExclusions", alias = "exclusions")]
    pub exclusions: Vec<String>,
}

impl MirrorsConfig {
    /// Builds a validated config from an already-parsed document.
    ///
    /// Accepts `{"mirrors": [...], "geminiExclusions": [...]}` and the older
    /// bare-list form `[...]`.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let (mirrors, exclusions) = match value {
            Value::Array(entries) => (entries, Value::Null),
            Value::Object(mut map) => {
                let mirrors = match map.remove("mirrors") {
                    Some(Value::Array(entries)) => entries,
                    Some(_) => {
                        return Err(ConfigError::Parse("'mirrors' must be a list".into()));
                    }
                    None => return Err(ConfigError::Shape),
                };
                let exclusions = map
                    .remove("geminiExclusions")
                    .or_else(|| map.remove("exclusions"))
                    .unwrap_or(Value::Null);
                (mirrors, exclusions)
            }
            _ => return Err(ConfigError::Shape),
        };

        let mut sources = Vec::with_capacity(mirrors.len());
        for (index, entry) in mirrors.into_iter().enumerate() {
            let Value::Object(fields) = &entry else {
                return Err(ConfigError::Parse(format!(
                    "mirror entry {index} must be an object"
                )));
            };
            for field in REQUIRED_FIELDS {
                if !fields.contains_key(field) {
                    return Err(ConfigError::MissingField { index, field });
                }
            }
            let source: MirrorSource = serde_json::from_value(entry)
                .map_err(|e| ConfigError::Parse(format!("mirror entry {index}: {e}")))?;
            sources.push(source);
        }

        let exclusions = match exclusions {
            Value::Null => Vec::new(),
            other => serde_json::from_value::<Vec<String>>(other).map_err(|e| {
                ConfigError::Parse(format!("exclusions must be a list of strings: {e}"))
            })?,
        };

        let config = MirrorsConfig {
            mirrors: sources,
            exclusions,
        };
        config.validate()?;
        config.trace_loaded();
        Ok(config)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for (index, source) in self.mirrors.iter().enumerate() {
            for (field, value) in [
                ("owner", &source.owner),
                ("repo", &source.repo),
                ("branch", &source.branch),
                ("docsPath", &source.docs_path),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::EmptyField { index, field });
                }
            }
            for (field, value) in [("owner", &source.owner), ("repo", &source.repo)] {
                if !is_single_segment(value) {
                    return Err(ConfigError::InvalidSegment {
                        index,
                        field,
                        value: value.clone(),
                    });
                }
            }
            if !is_contained_relative(&source.docs_path) {
                return Err(ConfigError::InvalidDocsPath {
                    id: source.id(),
                    docs_path: source.docs_path.clone(),
                });
            }
            if !seen.insert(source.id().to_lowercase()) {
                return Err(ConfigError::Duplicate { id: source.id() });
            }
        }
        Ok(())
    }

    /// Every store identifier the config allows to exist.
    pub fn valid_ids(&self) -> BTreeSet<String> {
        self.mirrors.iter().map(MirrorSource::id).collect()
    }

    /// Sources matching the allowlist (case-insensitive `owner/repo`).
    /// All of them when the allowlist is empty.
    pub fn select(&self, only: &[String]) -> Vec<MirrorSource> {
        if only.is_empty() {
            return self.mirrors.clone();
        }
        let wanted: BTreeSet<String> = only.iter().map(|s| s.to_lowercase()).collect();
        self.mirrors
            .iter()
            .filter(|m| wanted.contains(&m.id().to_lowercase()))
            .cloned()
            .collect()
    }

    pub fn trace_loaded(&self) {
        info!(
            mirrors = self.mirrors.len(),
            exclusions = self.exclusions.len(),
            "Loaded mirrors config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

fn is_contained_relative(docs_path: &str) -> bool {
    let path = Path::new(docs_path);
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `owner` and `repo` each name exactly one directory under the working tree.
fn is_single_segment(value: &str) -> bool {
    if value.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
