use sha2::{Digest, Sha256};

/// Ordered path patterns that keep files out of the index.
///
/// A pattern matches a store-relative POSIX path when it is equal to it, when it has
/// the form `prefix/*` and the path is `prefix` or lies below it, or when the path
/// lies below the pattern taken as a plain prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionPolicy {
    patterns: Vec<String>,
}

impl ExclusionPolicy {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if path == pattern {
                return true;
            }
            if let Some(prefix) = pattern.strip_suffix("/*") {
                if path == prefix || is_below(path, prefix) {
                    return true;
                }
            }
            is_below(path, pattern)
        })
    }

    /// Stable hash of the policy: sha256 over the compact JSON array of patterns.
    pub fn hash(&self) -> String {
        let payload = serde_json::to_string(&self.patterns).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn is_below(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}
