//! README status sections.
//!
//! Only the marker-delimited sections are rewritten; everything else in the file is
//! left as the maintainers wrote it.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use regex::{NoExpand, Regex};

use crate::config::{MirrorSource, MirrorsConfig};
use crate::janitor::RESERVED_DIRS;
use crate::mirror::mirror_dir;
use crate::state::ReconciliationState;
use crate::tree::{read_provenance, write_atomic, META_FILENAME};

const TEMPLATE: &str = "# Documentation References

<!-- AUTO:MIRROR_STATUS -->
<!-- /AUTO:MIRROR_STATUS -->

<!-- AUTO:SEMANTIC_SEARCH -->
<!-- /AUTO:SEMANTIC_SEARCH -->

<!-- AUTO:REPOSITORY_TREE -->
<!-- /AUTO:REPOSITORY_TREE -->

## Managing Mirrors

- Update `mirrors.json` to add or remove mirrors
- Each entry requires `owner`, `repo`, `branch`, and `docsPath`
- Optional `geminiExclusions` array to exclude paths from search indexing
";

/// One row of the mirror status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: String,
    pub branch: String,
    pub docs_path: String,
    pub revision: String,
    pub synced_at: String,
}

/// Status rows from each mirror's provenance file, `-` where nothing was synced yet.
pub fn collect_status(root: &Path, mirrors: &[MirrorSource]) -> Vec<StatusRow> {
    mirrors
        .iter()
        .map(|source| match read_provenance(&mirror_dir(root, source)) {
            Some(meta) => StatusRow {
                id: meta.id(),
                branch: meta.branch,
                docs_path: meta.docs_path,
                revision: meta.source_revision,
                synced_at: meta
                    .synced_at
                    .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                    .unwrap_or_else(|| "-".into()),
            },
            None => StatusRow {
                id: source.id(),
                branch: source.branch.clone(),
                docs_path: source.docs_path.clone(),
                revision: "-".into(),
                synced_at: "-".into(),
            },
        })
        .collect()
}

pub fn status_table(rows: &[StatusRow]) -> String {
    let mut lines = vec![
        "| Mirror | Upstream | Branch | Docs Path | Last Commit | Synced At |".to_string(),
        "| --- | --- | --- | --- | --- | --- |".to_string(),
    ];
    if rows.is_empty() {
        lines.push("| _none_ | – | – | – | – | – |".to_string());
    }
    for row in rows {
        let upstream = format!("https://github.com/{}", row.id);
        let revision: String = if row.revision != "-" {
            row.revision.chars().take(7).collect()
        } else {
            row.revision.clone()
        };
        lines.push(format!(
            "| {} | [{upstream}]({upstream}) | {} | {} | {revision} | {} |",
            row.id, row.branch, row.docs_path, row.synced_at
        ));
    }
    lines.join("\n")
}

fn search_summary(state: &ReconciliationState) -> String {
    let indexed: Vec<_> = state.stores.values().filter_map(|r| r.index.as_ref()).collect();
    let files: u64 = indexed.iter().map(|i| i.files).sum();
    let cost: f64 = indexed.iter().map(|i| i.cost).sum();
    let last_sync = state
        .last_sync
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "Never".into());
    format!(
        "- **Stores**: {}\n- **Files indexed**: {files}\n- **Total cost**: ${cost:.4}\n- **Last sync**: {last_sync}",
        indexed.len()
    )
}

/// A `├──`/`└──` drawing of the working tree, not descending below mirror roots.
pub fn generate_tree(root: &Path, mirrors: &[MirrorSource]) -> String {
    let mirror_roots: BTreeSet<(String, String)> = mirrors
        .iter()
        .map(|m| (m.owner.clone(), m.repo.clone()))
        .collect();
    let mut lines = vec![".".to_string()];
    walk_tree(root, root, "", &mirror_roots, &mut lines);
    lines.join("\n")
}

fn walk_tree(
    root: &Path,
    dir: &Path,
    prefix: &str,
    mirror_roots: &BTreeSet<(String, String)>,
    lines: &mut Vec<String>,
) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<_> = read
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            !RESERVED_DIRS.contains(&name.as_str()) && name != META_FILENAME
        })
        .collect();
    children.sort_by_key(|p| {
        (
            !p.is_dir(),
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
        )
    });

    let count = children.len();
    for (idx, child) in children.into_iter().enumerate() {
        let last = idx + 1 == count;
        let name = child.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        lines.push(format!("{prefix}{}{name}", if last { "└── " } else { "├── " }));
        if !child.is_dir() {
            continue;
        }
        let rel: Vec<String> = child
            .strip_prefix(root)
            .map(|r| r.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect())
            .unwrap_or_default();
        let inside_mirror =
            rel.len() >= 3 && mirror_roots.contains(&(rel[0].clone(), rel[1].clone()));
        if inside_mirror {
            continue;
        }
        let next = format!("{prefix}{}", if last { "    " } else { "│   " });
        walk_tree(root, &child, &next, mirror_roots, lines);
    }
}

fn replace_section(content: &str, marker: &str, body: &str) -> String {
    let pattern = format!(r"(?s)<!-- AUTO:{marker} -->.*?<!-- /AUTO:{marker} -->");
    let replacement = format!("<!-- AUTO:{marker} -->\n{body}\n<!-- /AUTO:{marker} -->");
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(content, NoExpand(&replacement)).into_owned(),
        Err(_) => content.to_string(),
    }
}

/// Renders the README from its current content (or the template).
pub fn render(
    existing: Option<&str>,
    root: &Path,
    config: &MirrorsConfig,
    state: &ReconciliationState,
) -> String {
    let content = existing.unwrap_or(TEMPLATE);
    let table = status_table(&collect_status(root, &config.mirrors));
    let tree = generate_tree(root, &config.mirrors);

    let content = replace_section(
        content,
        "MIRROR_STATUS",
        &format!("## Mirror Status\n\n{table}"),
    );
    let content = replace_section(
        &content,
        "SEMANTIC_SEARCH",
        &format!(
            "## Semantic Search\n\nThis repository is indexed into search stores, one per mirror.\n\n{}",
            search_summary(state)
        ),
    );
    replace_section(
        &content,
        "REPOSITORY_TREE",
        &format!("## Repository Tree\n\n```\n{tree}\n```"),
    )
}

pub fn update_readme(
    path: &Path,
    root: &Path,
    config: &MirrorsConfig,
    state: &ReconciliationState,
) -> io::Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    let rendered = render(existing.as_deref(), root, config, state);
    write_atomic(path, rendered.as_bytes())?;
    tracing::info!(path = %path.display(), "README.md updated (preserved manual edits)");
    Ok(())
}
