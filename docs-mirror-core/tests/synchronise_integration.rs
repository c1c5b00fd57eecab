use std::fs;
use std::path::{Path, PathBuf};

use docs_mirror_core::config::{MirrorSource, MirrorsConfig};
use docs_mirror_core::contract::{
    FetchedTree, MockContentFetcher, MockIndexBackend, MockUpstreamProbe,
};
use docs_mirror_core::error::ProbeError;
use docs_mirror_core::index::IndexSettings;
use docs_mirror_core::mirror::MirrorSettings;
use docs_mirror_core::state::{MirrorRecord, MirrorStatus, ReconciliationState, StateStore};
use docs_mirror_core::synchronise::{synchronise, Collaborators, RunContext, SyncOptions};
use docs_mirror_core::tree::{read_provenance, write_provenance, Provenance, META_FILENAME};
use tempfile::{tempdir, TempDir};

struct Workspace {
    root: TempDir,
    upstream: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let upstream = tempdir().unwrap();
        write(&upstream.path().join("index.md"), "# Index\n\nWelcome to the docs.");
        write(&upstream.path().join("guide/setup.md"), "# Setup\n\nRun the installer.");
        Self {
            root: tempdir().unwrap(),
            upstream,
        }
    }

    fn ctx(&self, mirrors: Vec<MirrorSource>) -> RunContext {
        RunContext {
            root: self.root.path().to_path_buf(),
            state_path: self.state_path(),
            readme_path: None,
            controlling_revision: Some("home-rev".into()),
            config: MirrorsConfig {
                mirrors,
                exclusions: vec![],
            },
            mirror: MirrorSettings::default(),
            index: IndexSettings::default(),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.root.path().join(".reference-sync")
    }

    fn seed_state(&self, state: &mut ReconciliationState) {
        StateStore::new(self.state_path()).save(state, None).unwrap();
    }

    fn load_state(&self) -> ReconciliationState {
        StateStore::new(self.state_path()).load()
    }

    /// A mirror directory as a previous run would have left it.
    fn seed_mirror(&self, source: &MirrorSource, revision: &str) {
        let dir = self.root.path().join(&source.owner).join(&source.repo);
        write(&dir.join("index.md"), "old content");
        write_provenance(&dir, &Provenance::new(source, revision)).unwrap();
    }
}

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn synced_record(revision: &str, branch: &str, docs_path: &str) -> MirrorRecord {
    MirrorRecord {
        revision: Some(revision.into()),
        branch: Some(branch.into()),
        docs_path: Some(docs_path.into()),
        status: Some(MirrorStatus::Success),
        ..Default::default()
    }
}

fn probe_returning(revision: &'static str) -> MockUpstreamProbe {
    let mut probe = MockUpstreamProbe::new();
    probe
        .expect_resolve()
        .returning(move |_| Ok(revision.to_string()));
    probe
}

fn fetcher_serving(dir: &Path, revision: &'static str, times: usize) -> MockContentFetcher {
    let dir = dir.to_path_buf();
    let mut fetcher = MockContentFetcher::new();
    fetcher
        .expect_fetch()
        .times(times)
        .returning(move |_| Ok(FetchedTree::at(dir.clone(), revision)));
    fetcher
}

fn mirrors_only() -> SyncOptions {
    SyncOptions {
        index: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn unchanged_upstream_skips_fetch() {
    let ws = Workspace::new();
    let source = MirrorSource::new("A", "B", "main", "docs");
    ws.seed_mirror(&source, "abc123");
    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("A/B".into(), synced_record("abc123", "main", "docs"));
    ws.seed_state(&mut state);

    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("abc123"),
        fetcher: fetcher_serving(ws.upstream.path(), "abc123", 0),
        backend: None,
    };
    let report = synchronise(&ws.ctx(vec![source]), &collab, &mirrors_only())
        .await
        .unwrap();

    assert_eq!(report.mirrors["A/B"].status, MirrorStatus::Unchanged);
    let saved = ws.load_state();
    assert_eq!(saved.stores["A/B"].status, Some(MirrorStatus::Unchanged));
    assert_eq!(saved.stores["A/B"].revision.as_deref(), Some("abc123"));
    assert_eq!(saved.last_revision.as_deref(), Some("home-rev"));
}

#[tokio::test]
async fn new_upstream_revision_replaces_content_and_provenance() {
    let ws = Workspace::new();
    let source = MirrorSource::new("A", "B", "main", "docs");
    ws.seed_mirror(&source, "abc123");
    write(&ws.root.path().join("A/B/removed-upstream.md"), "stale");
    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("A/B".into(), synced_record("abc123", "main", "docs"));
    ws.seed_state(&mut state);

    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("def456"),
        fetcher: fetcher_serving(ws.upstream.path(), "def456", 1),
        backend: None,
    };
    let report = synchronise(&ws.ctx(vec![source]), &collab, &mirrors_only())
        .await
        .unwrap();

    let outcome = &report.mirrors["A/B"];
    assert_eq!(outcome.status, MirrorStatus::Success);
    assert!(outcome.changed);

    let dir = ws.root.path().join("A/B");
    let meta = read_provenance(&dir).unwrap();
    assert_eq!(meta.source_revision, "def456");
    assert!(dir.join("guide/setup.md").is_file());
    assert!(!dir.join("removed-upstream.md").exists());
    assert_eq!(
        fs::read_to_string(dir.join("index.md")).unwrap(),
        "# Index\n\nWelcome to the docs."
    );
    assert_eq!(ws.load_state().stores["A/B"].revision.as_deref(), Some("def456"));
}

#[tokio::test]
async fn branch_change_forces_resync_at_same_revision() {
    let ws = Workspace::new();
    let source = MirrorSource::new("A", "B", "next", "docs");
    ws.seed_mirror(&source, "abc123");
    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("A/B".into(), synced_record("abc123", "main", "docs"));
    ws.seed_state(&mut state);

    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("abc123"),
        fetcher: fetcher_serving(ws.upstream.path(), "abc123", 1),
        backend: None,
    };
    let report = synchronise(&ws.ctx(vec![source]), &collab, &mirrors_only())
        .await
        .unwrap();

    assert_eq!(report.mirrors["A/B"].status, MirrorStatus::Success);
    assert_eq!(ws.load_state().stores["A/B"].branch.as_deref(), Some("next"));
}

#[tokio::test]
async fn docs_path_change_resyncs_only_that_mirror() {
    let ws = Workspace::new();
    let moved = MirrorSource::new("A", "B", "main", "documentation");
    let steady = MirrorSource::new("C", "D", "main", "docs");
    ws.seed_mirror(&MirrorSource::new("A", "B", "main", "docs"), "abc123");
    ws.seed_mirror(&steady, "abc123");
    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("A/B".into(), synced_record("abc123", "main", "docs"));
    state
        .stores
        .insert("C/D".into(), synced_record("abc123", "main", "docs"));
    ws.seed_state(&mut state);

    // Only A/B has an expectation, so a fetch of C/D fails the test.
    let upstream = ws.upstream.path().to_path_buf();
    let mut fetcher = MockContentFetcher::new();
    fetcher
        .expect_fetch()
        .withf(|source: &MirrorSource| source.id() == "A/B")
        .times(1)
        .returning(move |_| Ok(FetchedTree::at(upstream.clone(), "abc123")));
    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("abc123"),
        fetcher,
        backend: None,
    };
    let report = synchronise(&ws.ctx(vec![moved, steady]), &collab, &mirrors_only())
        .await
        .unwrap();

    assert_eq!(report.mirrors["A/B"].status, MirrorStatus::Success);
    assert!(report.mirrors["A/B"].changed);
    assert_eq!(report.mirrors["C/D"].status, MirrorStatus::Unchanged);
    assert!(!report.mirrors["C/D"].changed);

    let saved = ws.load_state();
    assert_eq!(saved.stores["A/B"].docs_path.as_deref(), Some("documentation"));
    assert_eq!(saved.stores["C/D"].docs_path.as_deref(), Some("docs"));
    let meta = read_provenance(&ws.root.path().join("A/B")).unwrap();
    assert_eq!(meta.docs_path, "documentation");
}

#[tokio::test]
async fn failing_mirror_does_not_affect_others() {
    let ws = Workspace::new();
    let good = MirrorSource::new("A", "B", "main", "docs");
    let bad = MirrorSource::new("C", "D", "gone", "docs");
    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("C/D".into(), synced_record("old999", "gone", "docs"));
    ws.seed_state(&mut state);

    let mut probe = MockUpstreamProbe::new();
    probe.expect_resolve().returning(|source: &MirrorSource| {
        if source.repo == "D" {
            Err(ProbeError::BranchNotFound {
                id: source.id(),
                branch: source.branch.clone(),
            })
        } else {
            Ok("def456".to_string())
        }
    });
    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe,
        fetcher: fetcher_serving(ws.upstream.path(), "def456", 1),
        backend: None,
    };
    let report = synchronise(&ws.ctx(vec![good, bad]), &collab, &mirrors_only())
        .await
        .unwrap();

    assert_eq!(report.mirrors["A/B"].status, MirrorStatus::Success);
    assert_eq!(report.mirrors["C/D"].status, MirrorStatus::Failed);
    assert!(report.has_failures());

    let saved = ws.load_state();
    assert_eq!(saved.stores["A/B"].revision.as_deref(), Some("def456"));
    // Prior record is kept as it was.
    assert_eq!(saved.stores["C/D"].revision.as_deref(), Some("old999"));
    assert_eq!(saved.stores["C/D"].status, Some(MirrorStatus::Success));
}

#[tokio::test]
async fn second_and_third_runs_are_stable() {
    let ws = Workspace::new();
    let source = MirrorSource::new("A", "B", "main", "docs");
    let ctx = ws.ctx(vec![source]);
    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("r1"),
        fetcher: fetcher_serving(ws.upstream.path(), "r1", 1),
        backend: None,
    };

    let first = synchronise(&ctx, &collab, &mirrors_only()).await.unwrap();
    assert!(first.mirrors["A/B"].changed);

    let second = synchronise(&ctx, &collab, &mirrors_only()).await.unwrap();
    assert!(!second.mirrors["A/B"].changed);
    let after_second = ws.load_state();

    synchronise(&ctx, &collab, &mirrors_only()).await.unwrap();
    let after_third = ws.load_state();

    let strip = |mut state: ReconciliationState| {
        state.last_sync = None;
        for record in state.stores.values_mut() {
            record.synced = None;
        }
        state
    };
    assert_eq!(strip(after_second), strip(after_third));
}

#[tokio::test]
async fn only_filter_never_purges_unselected_mirrors() {
    let ws = Workspace::new();
    let selected = MirrorSource::new("A", "B", "main", "docs");
    let other = MirrorSource::new("C", "D", "main", "docs");
    let removed = MirrorSource::new("X", "Y", "main", "docs");
    ws.seed_mirror(&other, "keep1");
    ws.seed_mirror(&removed, "gone1");
    write(&ws.root.path().join("notes/handwritten/info.md"), "mine");

    let mut state = ReconciliationState::default();
    state
        .stores
        .insert("C/D".into(), synced_record("keep1", "main", "docs"));
    state
        .stores
        .insert("X/Y".into(), synced_record("gone1", "main", "docs"));
    ws.seed_state(&mut state);

    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("r1"),
        fetcher: fetcher_serving(ws.upstream.path(), "r1", 1),
        backend: None,
    };
    let options = SyncOptions {
        only: vec!["a/b".into()],
        index: false,
        ..Default::default()
    };
    let report = synchronise(&ws.ctx(vec![selected, other]), &collab, &options)
        .await
        .unwrap();

    assert_eq!(report.mirrors.len(), 1);
    assert_eq!(report.purged.state_entries, vec!["X/Y".to_string()]);
    assert_eq!(report.purged.directories, vec!["X/Y".to_string()]);

    let root = ws.root.path();
    assert!(root.join("C/D").join(META_FILENAME).is_file());
    assert!(!root.join("X").exists());
    assert!(root.join("notes/handwritten/info.md").is_file());

    let saved = ws.load_state();
    assert!(saved.stores.contains_key("C/D"));
    assert!(!saved.stores.contains_key("X/Y"));
}

#[tokio::test]
async fn readme_sections_are_refreshed_after_the_run() {
    let ws = Workspace::new();
    let source = MirrorSource::new("A", "B", "main", "docs");
    let readme = ws.root.path().join("README.md");
    write(
        &readme,
        "# My references\n\n<!-- AUTO:MIRROR_STATUS -->\n<!-- /AUTO:MIRROR_STATUS -->\n",
    );
    let mut ctx = ws.ctx(vec![source]);
    ctx.readme_path = Some(readme.clone());

    let collab = Collaborators::<_, _, MockIndexBackend> {
        probe: probe_returning("def4567aaaa"),
        fetcher: fetcher_serving(ws.upstream.path(), "def4567aaaa", 1),
        backend: None,
    };
    synchronise(&ctx, &collab, &SyncOptions::default()).await.unwrap();

    let body = fs::read_to_string(readme).unwrap();
    assert!(body.starts_with("# My references\n"));
    assert!(body.contains("| A/B |"));
    assert!(body.contains("| def4567 |"));
}
