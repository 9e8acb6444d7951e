//! Ask command - grounded answer from the owner's notes

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{print_json, Session};

pub async fn run(session: &Session, question: &str, json: bool) -> Result<()> {
    let owner = session.owner()?;

    // Ctrl-C before the model is called abandons the request.
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                cancel.cancel();
            }
        })
    };
    let result = session
        .kb
        .ask_with_cancellation(owner, question, &cancel)
        .await;
    watcher.abort();
    let response = result?;

    if json {
        return print_json(&response);
    }

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("{}", "Sources".bold());
        for (i, source) in response.sources.iter().enumerate() {
            let score = source
                .score
                .map(|s| format!(" ({:.2})", s))
                .unwrap_or_default();
            println!(
                "  [Note {}] {}{}",
                i + 1,
                source.title.cyan(),
                score.dimmed()
            );
        }
    }
    Ok(())
}
