//! # contract: interfaces to the external collaborators
//!
//! The reconciliation core never talks to git or to the indexing backend directly.
//! It goes through three async traits:
//!   - [`UpstreamProbe`]: cheap remote ref lookup (one `ls-remote`)
//!   - [`ContentFetcher`]: expensive sparse/shallow fetch of a docs subpath
//!   - [`IndexBackend`]: create/list/delete stores, upload files, poll operations
//!
//! Production implementations live in [`crate::download`] (git) and in the CLI crate
//! (HTTP backend). All traits are annotated for `mockall`, so tests can generate
//! deterministic mocks (`MockUpstreamProbe`, `MockContentFetcher`, `MockIndexBackend`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;
use tempfile::TempDir;

use crate::config::MirrorSource;
use crate::error::{BackendError, FetchError, ProbeError};

/// A docs subtree fetched from upstream, ready to be copied into the mirror.
///
/// When the tree lives in a temporary checkout, the checkout is removed on drop.
#[derive(Debug)]
pub struct FetchedTree {
    docs_dir: PathBuf,
    revision: String,
    _checkout: Option<TempDir>,
}

impl FetchedTree {
    /// A tree inside a temporary checkout owned by this value.
    pub fn in_checkout(checkout: TempDir, docs_dir: PathBuf, revision: impl Into<String>) -> Self {
        Self {
            docs_dir,
            revision: revision.into(),
            _checkout: Some(checkout),
        }
    }

    /// A tree at a caller-managed location.
    pub fn at(docs_dir: impl Into<PathBuf>, revision: impl Into<String>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
            revision: revision.into(),
            _checkout: None,
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

/// Resolves the current upstream revision of a mirror source's branch.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// Fails with [`ProbeError::BranchNotFound`] when the branch does not exist.
    async fn resolve(&self, source: &MirrorSource) -> Result<String, ProbeError>;
}

/// Fetches only the configured docs subpath of a source.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, source: &MirrorSource) -> Result<FetchedTree, FetchError>;
}

/// A store as observed on the backend. Several handles may share a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStoreHandle {
    /// Opaque backend identifier (e.g. `fileSearchStores/abc123`).
    pub name: String,
    pub display_name: Option<String>,
}

/// One file to upload into a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Local file with the bytes to send (may be a transcoded temporary copy).
    pub path: PathBuf,
    /// Store-relative POSIX path recorded as the document's identity.
    pub display_name: String,
    pub mime_type: &'static str,
}

/// Handle to an asynchronous backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOperation {
    pub name: String,
    pub done: bool,
}

/// Remote indexing backend primitives, keyed by display name and opaque handles.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// List every store visible to the caller.
    async fn list_stores(&self) -> Result<Vec<RemoteStoreHandle>, BackendError>;

    /// Create an empty store with the given display name.
    async fn create_store(&self, display_name: &str) -> Result<RemoteStoreHandle, BackendError>;

    /// Delete a store and all of its documents.
    async fn delete_store(&self, store: &RemoteStoreHandle) -> Result<(), BackendError>;

    /// Upload one file; indexing continues asynchronously behind the returned operation.
    async fn upload_file(
        &self,
        store: &RemoteStoreHandle,
        upload: &FileUpload,
    ) -> Result<UploadOperation, BackendError>;

    /// Refresh an operation's completion status.
    async fn poll_operation(&self, operation: &UploadOperation)
        -> Result<UploadOperation, BackendError>;
}
