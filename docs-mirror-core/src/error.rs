//! Error taxonomy for the reconciliation core.
//!
//! Only [`ConfigError`] and [`StateError`] (on save) abort a run. Probe, fetch
//! and backend errors are captured per mirror or per store and reported in the
//! run's [`SyncReport`](crate::synchronise::SyncReport).

use std::path::PathBuf;

/// Malformed or incomplete configuration. Fatal, raised before any work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("config must be an object with a 'mirrors' list (or a bare list of mirrors)")]
    Shape,

    #[error("mirror entry {index} missing '{field}' field")]
    MissingField { index: usize, field: &'static str },

    #[error("mirror entry {index} has an empty '{field}' field")]
    EmptyField { index: usize, field: &'static str },

    #[error("mirror entry {index} has invalid '{field}' '{value}': must be a single path segment")]
    InvalidSegment {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("mirror {id} is declared more than once")]
    Duplicate { id: String },

    #[error("mirror {id} has invalid docsPath '{docs_path}': must be relative and stay inside the repository")]
    InvalidDocsPath { id: String, docs_path: String },
}

/// Remote ref lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Branch {branch} not found in {id}")]
    BranchNotFound { id: String, branch: String },

    #[error("Failed to get upstream revision for {id}@{branch}: {message}")]
    Remote {
        id: String,
        branch: String,
        message: String,
    },
}

/// Content fetch or local replace failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to checkout {id}@{branch}: {message}")]
    Checkout {
        id: String,
        branch: String,
        message: String,
    },

    #[error("Docs path '{docs_path}' not found in {id}@{branch}")]
    DocsPathMissing {
        id: String,
        branch: String,
        docs_path: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("replace task aborted: {0}")]
    Task(String),
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A remote indexing backend operation failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to {operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("could not decode {operation} response: {message}")]
    Decode { operation: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persisted state could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Unparseable document. Recovered by the loader (fresh state + warning).
    #[error("state file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise state: {0}")]
    Serialise(#[from] serde_json::Error),
}

impl StateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),
}
