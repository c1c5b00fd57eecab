///
/// This module implements the CLI interface for docs-mirror: command parsing,
/// argument defaults and the async entrypoint used by `main` and integration tests.
///
/// All reconciliation logic (mirrors, stores, state) lives in the [`docs-mirror-core`] crate.
/// This module only wires environment credentials and command-line options into a
/// [`RunContext`] and reports the result.
///
/// ## How To Use
/// - Command line: `docs-mirror sync --config mirrors.json` (see `--help`).
/// - Programmatic: call [`run`] with a constructed [`Cli`].
///
/// [`docs-mirror-core`]: ../../docs_mirror_core/
use crate::load_config::load_config;
use crate::upload::GeminiClient;
use anyhow::Result;
use clap::{Parser, Subcommand};
use docs_mirror_core::config::MirrorsConfig;
use docs_mirror_core::download::{head_revision, GitProbe, GitRemote, GitSparseFetcher};
use docs_mirror_core::index::IndexSettings;
use docs_mirror_core::mirror::MirrorSettings;
use docs_mirror_core::readme::{collect_status, status_table};
use docs_mirror_core::state::StateStore;
use docs_mirror_core::synchronise::{synchronise, Collaborators, RunContext, SyncOptions};
use std::path::{Path, PathBuf};

/// State file name at the working-tree root.
pub const DEFAULT_STATE_FILE: &str = ".reference-sync";

/// CLI for docs-mirror: keep documentation mirrors and their search stores in sync.
#[derive(Parser)]
#[clap(
    name = "docs-mirror",
    version,
    about = "Mirror upstream documentation subtrees and keep one search store per mirror in sync"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile mirrors and search stores against the config file
    Sync {
        /// Path to the mirrors config (JSON or YAML)
        #[clap(long)]
        config: PathBuf,
        /// Working tree holding the `<owner>/<repo>` mirrors
        #[clap(long, default_value = ".")]
        root: PathBuf,
        /// State file (defaults to `<root>/.reference-sync`)
        #[clap(long)]
        state: Option<PathBuf>,
        /// README to refresh (defaults to `<root>/README.md`)
        #[clap(long, conflicts_with = "no_readme")]
        readme: Option<PathBuf>,
        /// Do not touch the README
        #[clap(long)]
        no_readme: bool,
        /// Skip the mirror phase
        #[clap(long)]
        skip_mirrors: bool,
        /// Skip the index phase
        #[clap(long)]
        skip_index: bool,
        /// Restrict the run to these `OWNER/REPO` mirrors (repeatable)
        #[clap(long = "only", value_name = "OWNER/REPO")]
        only: Vec<String>,
        /// Process one mirror and one store at a time
        #[clap(long)]
        no_parallel: bool,
    },
    /// Print the mirror status table
    Status {
        /// Path to the mirrors config (JSON or YAML)
        #[clap(long)]
        config: PathBuf,
        /// Working tree holding the `<owner>/<repo>` mirrors
        #[clap(long, default_value = ".")]
        root: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            root,
            state,
            readme,
            no_readme,
            skip_mirrors,
            skip_index,
            only,
            no_parallel,
        } => {
            let config = load_config(config)?;
            tracing::info!(
                command = "sync",
                root = %root.display(),
                "Starting synchronisation process"
            );

            let readme_path = if no_readme {
                None
            } else {
                Some(readme.unwrap_or_else(|| root.join("README.md")))
            };
            let ctx = RunContext {
                state_path: state.unwrap_or_else(|| root.join(DEFAULT_STATE_FILE)),
                readme_path,
                controlling_revision: head_revision(&root).await,
                config,
                mirror: MirrorSettings::default(),
                index: IndexSettings::default(),
                root,
            };

            let remote = GitRemote::new(std::env::var("MIRROR_GIT_TOKEN").ok());
            let backend = GeminiClient::new_from_env();
            if backend.is_none() && !skip_index {
                tracing::warn!(
                    command = "sync",
                    "GEMINI_API_KEY not set; index phase will be skipped"
                );
            }
            let collab = Collaborators {
                probe: GitProbe::new(remote.clone()),
                fetcher: GitSparseFetcher::new(remote),
                backend,
            };
            let options = SyncOptions {
                only,
                mirrors: !skip_mirrors,
                index: !skip_index,
                parallel: !no_parallel,
            };

            match synchronise(&ctx, &collab, &options).await {
                Ok(report) => {
                    tracing::info!(
                        command = "sync",
                        failures = report.has_failures(),
                        "Synchronisation complete"
                    );
                    println!("{report}");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e).context("Synchronisation failed"))
                }
            }
        }
        Commands::Status { config, root } => {
            let config = load_config(config)?;
            println!("{}", status_report(&config, &root)?);
            Ok(())
        }
    }
}

fn status_report(config: &MirrorsConfig, root: &Path) -> Result<String> {
    if !root.is_dir() {
        anyhow::bail!("Working tree {} does not exist", root.display());
    }
    let state = StateStore::new(root.join(DEFAULT_STATE_FILE)).load();
    let mut out = status_table(&collect_status(root, &config.mirrors));
    let last_sync = state
        .last_sync
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".into());
    out.push_str(&format!("\n\nLast sync: {last_sync}"));
    for source in &config.mirrors {
        let id = source.id();
        let index = state
            .record(&id)
            .and_then(|r| r.index.as_ref())
            .map(|i| format!("{} files, ${:.4}, {:?}", i.files, i.cost, i.status))
            .unwrap_or_else(|| "not indexed".into());
        out.push_str(&format!("\n  {id}: {index}"));
    }
    Ok(out)
}
