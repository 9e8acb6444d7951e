//! Index command - re-embed notes and show index status

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use colored::Colorize;

use super::Session;

pub async fn run(session: &Session, db_path: &Path, status_only: bool, json: bool) -> Result<()> {
    let owner = session.owner()?;

    if status_only {
        return show_status(session, db_path, json);
    }

    if !json {
        println!("{} Re-embedding notes...", "→".dimmed());
    }
    let start = Instant::now();
    let queued = session.kb.reindex(owner).await?;
    session.kb.wait_idle().await;
    let stats = session.kb.stats(Some(owner))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "queued": queued,
                "embedded": stats.embedding_count,
                "duration_ms": duration_ms,
            })
        );
    } else {
        println!();
        println!(
            "{} Indexed {} notes in {:.2}s",
            "✓".green().bold(),
            queued.to_string().cyan(),
            duration_ms as f64 / 1000.0
        );
        let skipped = queued.saturating_sub(stats.embedding_count);
        if skipped > 0 {
            println!(
                "  {} {} notes without embedding (too short or provider unavailable)",
                "→".dimmed(),
                skipped
            );
        }
    }

    Ok(())
}

fn show_status(session: &Session, db_path: &Path, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let stats = session.kb.stats(Some(owner))?;
    let file_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "note_count": stats.note_count,
                "deleted_count": stats.deleted_count,
                "embedding_count": stats.embedding_count,
                "link_count": stats.link_count,
                "last_indexed": stats.last_indexed,
                "file_size_bytes": file_size,
            })
        );
        return Ok(());
    }

    println!("{}", "Index Status".bold());
    println!();
    println!("  {} {} notes", "→".dimmed(), stats.note_count.to_string().cyan());
    println!("  {} {} in trash", "→".dimmed(), stats.deleted_count);
    println!(
        "  {} {} embeddings",
        "→".dimmed(),
        stats.embedding_count.to_string().cyan()
    );
    println!("  {} {} links", "→".dimmed(), stats.link_count);
    println!("  {} Size: {:.2} KB", "→".dimmed(), file_size as f64 / 1024.0);
    if let Some(ts) = stats.last_indexed {
        let dt = chrono::DateTime::from_timestamp(ts, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        println!("  {} Last indexed: {}", "→".dimmed(), dt);
    }
    Ok(())
}
