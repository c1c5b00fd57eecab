//! Index planning: which stores must be rebuilt this run.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::config::MirrorSource;
use crate::exclusion::ExclusionPolicy;
use crate::mirror::MirrorOutcome;
use crate::state::ReconciliationState;

/// Why the plan contains what it contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// Exclusion policy differs from the recorded one: every configured store.
    PolicyChanged,
    /// No recorded policy hash while successful indexes exist: every configured store, once.
    UnknownPolicyHistory,
    /// Changed mirrors plus stores never indexed successfully.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub stores: BTreeSet<String>,
    pub reason: PlanReason,
}

/// With no recorded policy hash, existing successful indexes may predate the policy.
/// Returns true when such indexes exist, so they get rebuilt once under the current policy.
pub fn force_reindex_on_unknown_policy_history(state: &ReconciliationState) -> bool {
    state.stores.values().any(|record| record.has_successful_index())
}

pub fn plan(
    sources: &[MirrorSource],
    state: &ReconciliationState,
    outcomes: &BTreeMap<String, MirrorOutcome>,
    policy: &ExclusionPolicy,
) -> IndexPlan {
    let configured: BTreeSet<String> = sources.iter().map(MirrorSource::id).collect();
    let current_hash = policy.hash();

    let forced = match state.exclusion_policy_hash.as_deref() {
        Some(previous) if previous == current_hash => None,
        Some(_) => Some(PlanReason::PolicyChanged),
        None if force_reindex_on_unknown_policy_history(state) => {
            Some(PlanReason::UnknownPolicyHistory)
        }
        None => None,
    };
    if let Some(reason) = forced {
        info!(
            ?reason,
            stores = configured.len(),
            "[INDEX] Exclusion policy changed, forcing full reindex"
        );
        return IndexPlan {
            stores: configured,
            reason,
        };
    }

    let changed = outcomes
        .values()
        .filter(|o| o.is_changed_success())
        .map(|o| o.id.clone());
    let never_indexed = configured
        .iter()
        .filter(|id| !state.record(id).is_some_and(|r| r.has_successful_index()))
        .cloned();

    let stores: BTreeSet<String> = changed
        .chain(never_indexed)
        .filter(|id| configured.contains(id))
        .collect();
    IndexPlan {
        stores,
        reason: PlanReason::Incremental,
    }
}
