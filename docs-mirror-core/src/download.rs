//! Git-backed collaborators: [`GitProbe`] (ref lookup) and [`GitSparseFetcher`] (docs fetch).
//!
//! Both shell out to the `git` binary. Credentials are passed in at construction
//! through [`GitRemote`]; nothing here reads the environment.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MirrorSource;
use crate::contract::{ContentFetcher, FetchedTree, UpstreamProbe};
use crate::error::{FetchError, ProbeError};

/// How to reach upstream repositories.
#[derive(Clone, Default)]
pub struct GitRemote {
    token: Option<String>,
}

impl std::fmt::Debug for GitRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRemote")
            .field("token_set", &self.token.is_some())
            .finish()
    }
}

impl GitRemote {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn url(&self, source: &MirrorSource) -> String {
        match &self.token {
            Some(token) => format!(
                "https://{token}@github.com/{}/{}.git",
                source.owner, source.repo
            ),
            None => format!("https://github.com/{}/{}.git", source.owner, source.repo),
        }
    }

    /// Strips the token from text that may end up in logs or reports.
    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }
}

/// Runs git and returns trimmed stdout, or a message including stderr.
async fn run_git<I, S>(args: I, cwd: Option<&Path>) -> Result<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to launch git: {e}"))?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(format!("git exited with {}: {stderr}", output.status));
    }
    if !stderr.is_empty() {
        debug!(stderr = %stderr, "git stderr");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Resolves branch heads with `git ls-remote`.
#[derive(Debug, Clone, Default)]
pub struct GitProbe {
    remote: GitRemote,
}

impl GitProbe {
    pub fn new(remote: GitRemote) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl UpstreamProbe for GitProbe {
    async fn resolve(&self, source: &MirrorSource) -> Result<String, ProbeError> {
        let reference = format!("refs/heads/{}", source.branch);
        let url = self.remote.url(source);
        let output = run_git(["ls-remote", url.as_str(), reference.as_str()], None)
            .await
            .map_err(|message| ProbeError::Remote {
                id: source.id(),
                branch: source.branch.clone(),
                message: self.remote.redact(&message),
            })?;
        match output.split_whitespace().next() {
            Some(sha) => {
                debug!(mirror_id = %source.id(), revision = sha, "Resolved upstream revision");
                Ok(sha.to_string())
            }
            None => Err(ProbeError::BranchNotFound {
                id: source.id(),
                branch: source.branch.clone(),
            }),
        }
    }
}

/// Shallow, blob-filtered, sparse clone of just the docs path.
#[derive(Debug, Clone, Default)]
pub struct GitSparseFetcher {
    remote: GitRemote,
}

impl GitSparseFetcher {
    pub fn new(remote: GitRemote) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ContentFetcher for GitSparseFetcher {
    async fn fetch(&self, source: &MirrorSource) -> Result<FetchedTree, FetchError> {
        let checkout_failed = |message: String| FetchError::Checkout {
            id: source.id(),
            branch: source.branch.clone(),
            message: self.remote.redact(&message),
        };

        let checkout = tempfile::Builder::new()
            .prefix("mirror-")
            .tempdir()
            .map_err(|e| FetchError::io(std::env::temp_dir(), e))?;
        let url = self.remote.url(source);

        info!(
            mirror_id = %source.id(),
            branch = %source.branch,
            docs_path = %source.docs_path,
            "[MIRROR] Sparse checkout"
        );
        run_git(
            [
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new("1"),
                OsStr::new("--filter=blob:none"),
                OsStr::new("--sparse"),
                OsStr::new("-b"),
                OsStr::new(&source.branch),
                OsStr::new(&url),
                checkout.path().as_os_str(),
            ],
            None,
        )
        .await
        .map_err(checkout_failed)?;

        run_git(
            ["sparse-checkout", "set", source.docs_path.as_str()],
            Some(checkout.path()),
        )
        .await
        .map_err(checkout_failed)?;

        let docs_dir = checkout.path().join(&source.docs_path);
        if !docs_dir.exists() {
            return Err(FetchError::DocsPathMissing {
                id: source.id(),
                branch: source.branch.clone(),
                docs_path: source.docs_path.clone(),
            });
        }

        let revision = run_git(["rev-parse", "HEAD"], Some(checkout.path()))
            .await
            .map_err(checkout_failed)?;

        Ok(FetchedTree::in_checkout(checkout, docs_dir, revision))
    }
}

/// HEAD of the working tree that holds the mirrors, when it is a git checkout.
pub async fn head_revision(root: &Path) -> Option<String> {
    match run_git(["rev-parse", "HEAD"], Some(root)).await {
        Ok(sha) if !sha.is_empty() => Some(sha),
        Ok(_) => None,
        Err(message) => {
            debug!(root = %root.display(), error = %message, "Working tree revision unavailable");
            None
        }
    }
}
