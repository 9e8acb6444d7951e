//! Note lifecycle commands: add, edit, show, list, trash, restore, purge

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use mindvault::store::NoteFilter;
use mindvault::{Note, NoteUpdate};
use serde::Serialize;

use super::{parse_note_id, preview, print_json, Session};

/// Note summary for JSON output
#[derive(Debug, Serialize)]
struct NoteJson<'a> {
    id: String,
    title: &'a str,
    tags: &'a [String],
    body: &'a str,
    outbound_links: usize,
    backlinks: usize,
    is_deleted: bool,
    version: u64,
    updated_at: String,
}

impl<'a> From<&'a Note> for NoteJson<'a> {
    fn from(n: &'a Note) -> Self {
        Self {
            id: n.id.to_string(),
            title: &n.title,
            tags: &n.tags,
            body: &n.body,
            outbound_links: n.outbound_links.len(),
            backlinks: n.backlinks.len(),
            is_deleted: n.is_deleted,
            version: n.version,
            updated_at: n.updated_at.to_rfc3339(),
        }
    }
}

/// Body from `--body` or `--file`; `--file` wins.
pub fn read_body(body: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(body),
    }
}

pub async fn add(
    session: &Session,
    title: &str,
    body: Option<String>,
    file: Option<&Path>,
    tags: Vec<String>,
    json: bool,
) -> Result<()> {
    let owner = session.owner()?;
    let body = read_body(body, file)?.unwrap_or_default();
    let note = session.kb.create_note(owner, title, &body, tags).await?;

    if json {
        return print_json(&NoteJson::from(&note));
    }
    println!("{} Created {} {}", "✓".green(), note.title.cyan(), note.id.to_string().dimmed());
    report_links(&note);
    Ok(())
}

pub async fn edit(
    session: &Session,
    id: &str,
    title: Option<String>,
    body: Option<String>,
    file: Option<&Path>,
    tags: Option<Vec<String>>,
    json: bool,
) -> Result<()> {
    let owner = session.owner()?;
    let id = parse_note_id(id)?;
    let update = NoteUpdate {
        title,
        body: read_body(body, file)?,
        tags,
    };
    if update.title.is_none() && update.body.is_none() && update.tags.is_none() {
        bail!("Nothing to change. Pass --title, --body, --file or --tag");
    }
    let note = session.kb.save_note(owner, id, update).await?;

    if json {
        return print_json(&NoteJson::from(&note));
    }
    println!(
        "{} Saved {} (version {})",
        "✓".green(),
        note.title.cyan(),
        note.version
    );
    report_links(&note);
    Ok(())
}

pub fn show(session: &Session, id: &str, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let id = parse_note_id(id)?;
    let note = session
        .kb
        .get_note(owner, id)?
        .with_context(|| format!("Note not found: {}", id))?;

    if json {
        return print_json(&NoteJson::from(&note));
    }
    let status = if note.is_deleted { " (trash)".red().to_string() } else { String::new() };
    println!("{}{}", note.title.bold().cyan(), status);
    println!("{}", note.id.to_string().dimmed());
    if !note.tags.is_empty() {
        println!("tags: {}", note.tags.join(", "));
    }
    println!(
        "links: {} outbound, {} backlinks",
        note.outbound_links.len(),
        note.backlinks.len()
    );
    println!();
    println!("{}", note.body);
    Ok(())
}

pub fn list(session: &Session, trash: bool, limit: Option<usize>, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let mut filter = if trash { NoteFilter::trash() } else { NoteFilter::active() };
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }
    let notes = session.kb.list_notes(owner, &filter)?;

    if json {
        let items: Vec<NoteJson> = notes.iter().map(NoteJson::from).collect();
        return print_json(&items);
    }
    if notes.is_empty() {
        println!("{} No notes", "→".dimmed());
        return Ok(());
    }
    for note in &notes {
        println!(
            "{}  {}  {}",
            note.id.to_string().dimmed(),
            note.title.cyan(),
            preview(&note.plain_body(), 60).dimmed()
        );
    }
    Ok(())
}

pub fn trash(session: &Session, id: &str, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let note = session.kb.trash(owner, parse_note_id(id)?)?;
    if json {
        return print_json(&NoteJson::from(&note));
    }
    println!("{} Moved {} to trash", "✓".green(), note.title.cyan());
    Ok(())
}

pub async fn restore(session: &Session, id: &str, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let note = session.kb.restore(owner, parse_note_id(id)?).await?;
    if json {
        return print_json(&NoteJson::from(&note));
    }
    println!("{} Restored {}", "✓".green(), note.title.cyan());
    Ok(())
}

pub fn purge(session: &Session, id: &str, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let id = parse_note_id(id)?;
    session.kb.purge(owner, id)?;
    if json {
        return print_json(&serde_json::json!({ "purged": id.to_string() }));
    }
    println!("{} Permanently deleted {}", "✓".green(), id);
    Ok(())
}

fn report_links(note: &Note) {
    let titles: BTreeSet<String> = note.link_titles().into_iter().collect();
    if titles.is_empty() {
        return;
    }
    println!(
        "  {} links referenced, {} resolved",
        titles.len(),
        note.outbound_links.len()
    );
}
