//! Import command - create notes from a directory of markdown files

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use colored::Colorize;
use mindvault::core::frontmatter::Frontmatter;
use mindvault::{KnowledgeBase, NoteId, OwnerId};
use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use super::Session;

#[derive(Debug, Default, Serialize)]
pub struct ImportStats {
    pub imported: usize,
    pub failed: usize,
    /// Notes whose `[[links]]` were resolved after every file was created
    pub relinked: usize,
    pub duration_ms: u64,
}

/// Markdown files under `dir`, skipping hidden files and directories.
fn collect_markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().map(|e| e == "md").unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Import every markdown file under `dir` for `owner`.
///
/// Files are created first and linked in a second pass, so `[[links]]`
/// between imported files resolve regardless of walk order.
pub async fn import_dir(kb: &KnowledgeBase, owner: &OwnerId, dir: &Path) -> Result<ImportStats> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let start = Instant::now();
    let mut stats = ImportStats::default();
    let mut with_links: Vec<NoteId> = Vec::new();

    for path in collect_markdown_files(dir) {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                stats.failed += 1;
                continue;
            }
        };
        let (frontmatter, body) = Frontmatter::split(&content);
        let frontmatter = frontmatter.unwrap_or_default();
        let title = frontmatter.title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        match kb.create_note(owner, &title, body.trim(), frontmatter.tags).await {
            Ok(note) => {
                stats.imported += 1;
                if body.contains("[[") {
                    with_links.push(note.id);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to import note");
                stats.failed += 1;
            }
        }
    }

    for id in with_links {
        let update = kb.relink(owner, id).await?;
        if !update.outbound.is_empty() {
            stats.relinked += 1;
        }
    }
    kb.wait_idle().await;

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

pub async fn run(session: &Session, dir: &Path, json: bool) -> Result<()> {
    let owner = session.owner()?;
    if !json {
        println!("{} Importing from {}...", "→".dimmed(), dir.display());
    }
    let stats = import_dir(&session.kb, owner, dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "{} Imported {} notes in {:.2}s",
        "✓".green().bold(),
        stats.imported.to_string().cyan(),
        stats.duration_ms as f64 / 1000.0
    );
    if stats.relinked > 0 {
        println!("  {} {} notes linked", "→".dimmed(), stats.relinked);
    }
    if stats.failed > 0 {
        println!("  {} {} files failed", "✗".red(), stats.failed);
    }
    Ok(())
}
