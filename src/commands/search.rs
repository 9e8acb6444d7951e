//! Search command - tiered semantic search over the owner's notes

use anyhow::Result;
use colored::Colorize;

use super::{preview, print_json, Session};

pub async fn run(session: &Session, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let response = session.kb.search(owner, query, limit.unwrap_or(0)).await?;

    if json {
        return print_json(&response);
    }

    if response.results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}",
        "→".dimmed(),
        response.results.len(),
        query.cyan()
    );
    println!();

    for (i, hit) in response.results.iter().enumerate() {
        // Lexical tiers carry no comparable score.
        let score = match hit.score {
            Some(s) if s > 0.8 => format!("{:.2}", s).green(),
            Some(s) if s > 0.6 => format!("{:.2}", s).yellow(),
            Some(s) => format!("{:.2}", s).dimmed(),
            None => "text".dimmed(),
        };

        println!("{}. [{}] {}", (i + 1).to_string().bold(), score, hit.title.cyan());
        if !hit.snippet.is_empty() {
            println!("   {}", preview(&hit.snippet, 100).dimmed());
        }
        println!("   {}", hit.id.to_string().dimmed());
        println!();
    }

    Ok(())
}
