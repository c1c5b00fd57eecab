//! High-level pipeline: mirror phase → janitor → index phase → persist.
//!
//! The orchestrator is the single writer of [`ReconciliationState`]. Reconcilers
//! return outcomes; they are merged here one after another, after each phase has
//! finished its concurrent work.
//!
//! # Responsibilities
//! - Per-unit isolation: a failed mirror or store never aborts the others
//! - Config is the only truth for what may exist: the janitor and orphan deletion
//!   always see the full configured id set, even when `--only` narrows the work
//! - State is saved on every run that got past loading, including partial failures
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Supporting types: [`RunContext`], [`SyncOptions`], [`Collaborators`], [`SyncReport`]

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::MirrorsConfig;
use crate::contract::{ContentFetcher, IndexBackend, UpstreamProbe};
use crate::error::SyncError;
use crate::exclusion::ExclusionPolicy;
use crate::index::{IndexReconciler, IndexSettings, StoreOutcome};
use crate::janitor::{self, PurgeReport};
use crate::mirror::{MirrorOutcome, MirrorReconciler, MirrorSettings};
use crate::planner;
use crate::readme;
use crate::state::{
    timestamp_now, IndexRecord, IndexStatus, MirrorStatus, ReconciliationState, StateStore,
};

/// Everything one run needs, built once by the caller.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Working tree holding `<owner>/<repo>` mirrors.
    pub root: PathBuf,
    pub state_path: PathBuf,
    /// README whose marker sections are refreshed after the run.
    pub readme_path: Option<PathBuf>,
    /// Revision of the working tree itself, recorded as `lastRevision`.
    pub controlling_revision: Option<String>,
    pub config: MirrorsConfig,
    pub mirror: MirrorSettings,
    pub index: IndexSettings,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// `owner/repo` allowlist; empty means every configured mirror.
    pub only: Vec<String>,
    pub mirrors: bool,
    pub index: bool,
    pub parallel: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            mirrors: true,
            index: true,
            parallel: true,
        }
    }
}

/// External capabilities. Without a backend the index phase is skipped.
pub struct Collaborators<P, F, B> {
    pub probe: P,
    pub fetcher: F,
    pub backend: Option<B>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub mirrors: BTreeMap<String, MirrorOutcome>,
    pub stores: BTreeMap<String, StoreOutcome>,
    pub purged: PurgeReport,
    pub deleted_orphans: Vec<String>,
    pub healed_duplicates: Vec<String>,
    pub index_skipped: bool,
}

impl SyncReport {
    pub fn mirrors_with(&self, status: MirrorStatus) -> usize {
        self.mirrors.values().filter(|o| o.status == status).count()
    }

    pub fn stores_updated(&self) -> usize {
        self.stores.values().filter(|o| o.is_success()).count()
    }

    pub fn stores_failed(&self) -> usize {
        self.stores.len() - self.stores_updated()
    }

    pub fn files_indexed(&self) -> u64 {
        self.stores.values().map(|o| o.files).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.stores.values().map(|o| o.cost).sum()
    }

    /// Error messages of every failed unit, `id: message`.
    pub fn errors(&self) -> Vec<String> {
        let mirrors = self
            .mirrors
            .values()
            .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {e}", o.id)));
        let stores = self
            .stores
            .values()
            .filter_map(|o| o.error.as_ref().map(|e| format!("{} (index): {e}", o.id)));
        mirrors.chain(stores).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.mirrors_with(MirrorStatus::Failed) > 0 || self.stores_failed() > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync summary")?;
        writeln!(f, "  Mirrors updated:   {}", self.mirrors_with(MirrorStatus::Success))?;
        writeln!(f, "  Mirrors unchanged: {}", self.mirrors_with(MirrorStatus::Unchanged))?;
        writeln!(f, "  Mirrors failed:    {}", self.mirrors_with(MirrorStatus::Failed))?;
        if self.index_skipped {
            writeln!(f, "  Index phase:       skipped")?;
        } else {
            writeln!(f, "  Stores updated:    {}", self.stores_updated())?;
            writeln!(f, "  Stores failed:     {}", self.stores_failed())?;
            writeln!(f, "  Files indexed:     {}", self.files_indexed())?;
            writeln!(f, "  Estimated cost:    ${:.4}", self.total_cost())?;
        }
        if !self.purged.is_empty() {
            writeln!(
                f,
                "  Purged:            {} state entries, {} directories",
                self.purged.state_entries.len(),
                self.purged.directories.len()
            )?;
        }
        let errors = self.errors();
        if !errors.is_empty() {
            writeln!(f, "Errors:")?;
            for e in errors {
                writeln!(f, "  - {e}")?;
            }
        }
        Ok(())
    }
}

/// Runs one full reconciliation.
///
/// Only an unsavable state aborts with an error; every per-unit problem ends up in
/// the returned [`SyncReport`].
pub async fn synchronise<P, F, B>(
    ctx: &RunContext,
    collab: &Collaborators<P, F, B>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    P: UpstreamProbe,
    F: ContentFetcher,
    B: IndexBackend,
{
    info!("[SYNC] Starting reconciliation run");
    let store = StateStore::new(&ctx.state_path);
    let mut state = store.load();

    let sources = ctx.config.select(&options.only);
    if !options.only.is_empty() {
        info!(
            selected = sources.len(),
            only = ?options.only,
            "[SYNC] Restricting run to selected mirrors"
        );
    }
    let valid = ctx.config.valid_ids();
    let mut report = SyncReport::default();

    if options.mirrors {
        let reconciler =
            MirrorReconciler::new(&collab.probe, &collab.fetcher, &ctx.root, &ctx.mirror);
        report.mirrors = reconciler
            .reconcile_all(&sources, &state, options.parallel)
            .await;
        merge_mirror_outcomes(&mut state, ctx, &report.mirrors);
    } else {
        info!("[SYNC] Mirror phase disabled");
    }

    report.purged = janitor::purge(&mut state, &valid, &ctx.root);

    match (&collab.backend, options.index) {
        (Some(backend), true) => {
            let policy = ExclusionPolicy::new(ctx.config.exclusions.clone());
            let plan = planner::plan(&sources, &state, &report.mirrors, &policy);
            info!(reason = ?plan.reason, stores = plan.stores.len(), "[INDEX] Index plan ready");

            let reconciler = IndexReconciler::new(backend, &ctx.root, &policy, &ctx.index);
            let run = reconciler.apply(&plan.stores, &valid, options.parallel).await;
            state.exclusion_policy_hash = Some(policy.hash());
            merge_store_outcomes(&mut state, &run.results);

            report.stores = run.results;
            report.deleted_orphans = run.deleted_orphans;
            report.healed_duplicates = run.healed_duplicates;
        }
        (None, true) => {
            warn!("[INDEX] No index backend configured, skipping index phase");
            report.index_skipped = true;
        }
        (_, false) => {
            info!("[INDEX] Index phase disabled");
            report.index_skipped = true;
        }
    }

    if let Err(e) = store.save(&mut state, ctx.controlling_revision.clone()) {
        error!(error = %e, "[SYNC][ERROR] Failed to save state");
        return Err(e.into());
    }

    if let Some(readme_path) = &ctx.readme_path {
        if let Err(e) = readme::update_readme(readme_path, &ctx.root, &ctx.config, &state) {
            warn!(path = %readme_path.display(), error = %e, "[SYNC] Could not update README");
        }
    }

    info!(
        mirrors_updated = report.mirrors_with(MirrorStatus::Success),
        mirrors_unchanged = report.mirrors_with(MirrorStatus::Unchanged),
        mirrors_failed = report.mirrors_with(MirrorStatus::Failed),
        stores_updated = report.stores_updated(),
        stores_failed = report.stores_failed(),
        "[SYNC] Reconciliation run complete"
    );
    Ok(report)
}

/// Failed outcomes leave the prior record as it was.
fn merge_mirror_outcomes(
    state: &mut ReconciliationState,
    ctx: &RunContext,
    outcomes: &BTreeMap<String, MirrorOutcome>,
) {
    let now = timestamp_now();
    for source in &ctx.config.mirrors {
        let id = source.id();
        let Some(outcome) = outcomes.get(&id) else {
            continue;
        };
        if outcome.status == MirrorStatus::Failed {
            continue;
        }
        let record = state.stores.entry(id).or_default();
        record.revision = outcome.revision.clone();
        record.branch = Some(source.branch.clone());
        record.docs_path = Some(source.docs_path.clone());
        record.synced = Some(now);
        record.status = Some(outcome.status);
    }
}

fn merge_store_outcomes(state: &mut ReconciliationState, results: &BTreeMap<String, StoreOutcome>) {
    let now = timestamp_now();
    for (id, outcome) in results {
        let index = if outcome.is_success() {
            IndexRecord {
                files: outcome.files,
                cost: outcome.cost,
                synced: Some(now),
                status: IndexStatus::Success,
            }
        } else {
            IndexRecord {
                files: 0,
                cost: 0.0,
                synced: Some(now),
                status: IndexStatus::Failed,
            }
        };
        state.stores.entry(id.clone()).or_default().index = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: MirrorStatus, error: Option<&str>) -> MirrorOutcome {
        MirrorOutcome {
            id: id.into(),
            status,
            revision: None,
            changed: false,
            error: error.map(String::from),
        }
    }

    #[test]
    fn summary_counts_and_lists_errors() {
        let mut report = SyncReport::default();
        report
            .mirrors
            .insert("A/B".into(), outcome("A/B", MirrorStatus::Unchanged, None));
        report.mirrors.insert(
            "C/D".into(),
            outcome("C/D", MirrorStatus::Failed, Some("branch not found")),
        );
        report.index_skipped = true;

        let text = report.to_string();
        assert!(text.contains("Mirrors unchanged: 1"));
        assert!(text.contains("Mirrors failed:    1"));
        assert!(text.contains("Index phase:       skipped"));
        assert!(text.contains("- C/D: branch not found"));
        assert!(report.has_failures());
    }

    #[test]
    fn failed_store_is_recorded_with_zero_metrics() {
        let mut state = ReconciliationState::default();
        let mut results = BTreeMap::new();
        results.insert(
            "A/B".to_string(),
            StoreOutcome {
                id: "A/B".into(),
                status: IndexStatus::Failed,
                files: 7,
                cost: 1.0,
                failed_uploads: 0,
                completed: 0,
                timed_out: false,
                error: Some("Directory not found".into()),
            },
        );
        merge_store_outcomes(&mut state, &results);
        let index = state.stores["A/B"].index.clone().unwrap();
        assert_eq!(index.status, IndexStatus::Failed);
        assert_eq!(index.files, 0);
        assert_eq!(index.cost, 0.0);
    }
}
