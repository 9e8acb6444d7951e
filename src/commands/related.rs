//! Related command - link suggestions for a note

use anyhow::Result;
use colored::Colorize;

use super::{parse_note_id, print_json, Session};

pub async fn run(session: &Session, id: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let id = parse_note_id(id)?;
    let response = session.kb.related(owner, id, limit.unwrap_or(0)).await?;

    if json {
        return print_json(&response);
    }

    println!("{}", "Related Notes".bold());
    println!("{}", "=".repeat(60));

    if response.results.is_empty() {
        println!("{}", "No related notes found.".yellow());
        return Ok(());
    }

    // Suggestions the note already links to.
    let linked = session
        .kb
        .get_note(owner, id)?
        .map(|n| n.outbound_links)
        .unwrap_or_default();
    for hit in &response.results {
        let marker = if linked.contains(&hit.id) {
            "linked".dimmed()
        } else {
            format!("[[{}]]", hit.title).green()
        };
        println!("  {} {}", hit.title.cyan(), marker);
        println!("    {}", hit.id.to_string().dimmed());
    }
    Ok(())
}
