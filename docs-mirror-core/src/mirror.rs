//! Mirror reconciliation: decide unchanged / needs-sync / failed per source, and sync.
//!
//! Probing upstream is one ref lookup; fetching content is a partial clone. The two
//! are decoupled so an unchanged source never pays for a fetch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::MirrorSource;
use crate::contract::{ContentFetcher, UpstreamProbe};
use crate::error::FetchError;
use crate::state::{MirrorRecord, MirrorStatus, ReconciliationState};
use crate::tree::{replace_tree, write_provenance, Provenance};

#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Sources reconciled at once when parallelism is enabled.
    pub concurrency: usize,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

/// Result of reconciling one source.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOutcome {
    pub id: String,
    pub status: MirrorStatus,
    pub revision: Option<String>,
    pub changed: bool,
    pub error: Option<String>,
}

impl MirrorOutcome {
    fn unchanged(id: String, revision: String) -> Self {
        Self {
            id,
            status: MirrorStatus::Unchanged,
            revision: Some(revision),
            changed: false,
            error: None,
        }
    }

    fn synced(id: String, revision: String) -> Self {
        Self {
            id,
            status: MirrorStatus::Success,
            revision: Some(revision),
            changed: true,
            error: None,
        }
    }

    fn failed(id: String, error: String) -> Self {
        Self {
            id,
            status: MirrorStatus::Failed,
            revision: None,
            changed: false,
            error: Some(error),
        }
    }

    pub fn is_changed_success(&self) -> bool {
        self.status == MirrorStatus::Success && self.changed
    }
}

/// Local directory of a mirror: `<root>/<owner>/<repo>`.
pub fn mirror_dir(root: &Path, source: &MirrorSource) -> PathBuf {
    root.join(&source.owner).join(&source.repo)
}

/// True when the prior record was synced from a different branch or docs path.
pub fn config_drift(source: &MirrorSource, prior: Option<&MirrorRecord>) -> bool {
    match prior {
        Some(record) => {
            record.branch.as_deref() != Some(source.branch.as_str())
                || record.docs_path.as_deref() != Some(source.docs_path.as_str())
        }
        None => true,
    }
}

pub struct MirrorReconciler<'a, P, F> {
    probe: &'a P,
    fetcher: &'a F,
    root: &'a Path,
    settings: &'a MirrorSettings,
}

impl<'a, P, F> MirrorReconciler<'a, P, F>
where
    P: UpstreamProbe,
    F: ContentFetcher,
{
    pub fn new(
        probe: &'a P,
        fetcher: &'a F,
        root: &'a Path,
        settings: &'a MirrorSettings,
    ) -> Self {
        Self {
            probe,
            fetcher,
            root,
            settings,
        }
    }

    /// Reconciles one source against its prior record. Never mutates state.
    pub async fn reconcile(
        &self,
        source: &MirrorSource,
        prior: Option<&MirrorRecord>,
    ) -> MirrorOutcome {
        let id = source.id();

        let upstream = match self.probe.resolve(source).await {
            Ok(revision) => revision,
            Err(e) => {
                warn!(mirror_id = %id, error = %e, "[MIRROR] Upstream probe failed");
                return MirrorOutcome::failed(id, e.to_string());
            }
        };

        let drift = config_drift(source, prior);
        let dest = mirror_dir(self.root, source);
        let missing_local = !dest.exists();
        let same_revision = prior.and_then(|r| r.revision.as_deref()) == Some(upstream.as_str());

        if same_revision && !drift && !missing_local {
            info!(mirror_id = %id, revision = %upstream, "[MIRROR] Unchanged");
            return MirrorOutcome::unchanged(id, upstream);
        }
        info!(
            mirror_id = %id,
            revision = %upstream,
            same_revision,
            config_drift = drift,
            missing_local,
            "[MIRROR] Sync required"
        );

        match self.sync(source, dest).await {
            Ok(revision) => {
                info!(mirror_id = %id, revision = %revision, "[MIRROR] Synced");
                MirrorOutcome::synced(id, revision)
            }
            Err(e) => {
                error!(mirror_id = %id, error = %e, "[MIRROR][ERROR] Sync failed");
                MirrorOutcome::failed(id, e.to_string())
            }
        }
    }

    async fn sync(&self, source: &MirrorSource, dest: PathBuf) -> Result<String, FetchError> {
        let fetched = self.fetcher.fetch(source).await?;
        let provenance = Provenance::new(source, fetched.revision());

        // The fetched tree moves into the blocking task; its checkout is dropped there.
        tokio::task::spawn_blocking(move || {
            replace_tree(fetched.docs_dir(), &dest).map_err(|e| FetchError::io(&dest, e))?;
            write_provenance(&dest, &provenance).map_err(|e| FetchError::io(&dest, e))?;
            Ok::<_, FetchError>(provenance.source_revision)
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?
    }

    /// Reconciles every source with bounded concurrency; one at a time when `parallel` is off.
    pub async fn reconcile_all(
        &self,
        sources: &[MirrorSource],
        state: &ReconciliationState,
        parallel: bool,
    ) -> BTreeMap<String, MirrorOutcome> {
        let limit = if parallel {
            self.settings.concurrency.max(1)
        } else {
            1
        };
        info!(mirrors = sources.len(), concurrency = limit, "[MIRROR] Syncing mirrors");

        stream::iter(sources)
            .map(|source| async move {
                let prior = state.record(&source.id());
                self.reconcile(source, prior).await
            })
            .buffer_unordered(limit)
            .map(|outcome| (outcome.id.clone(), outcome))
            .collect()
            .await
    }
}
