//! Graph command - nodes and link edges of the owner's notes

use std::collections::HashMap;

use anyhow::Result;
use colored::Colorize;

use super::{print_json, Session};

pub fn run(session: &Session, json: bool) -> Result<()> {
    let owner = session.owner()?;
    let graph = session.kb.graph(owner)?;

    if json {
        return print_json(&graph);
    }

    println!("{}", "Note Graph".bold());
    println!();
    println!(
        "  {} {} notes, {} links",
        "→".dimmed(),
        graph.nodes.len().to_string().cyan(),
        graph.edges.len().to_string().cyan()
    );

    let titles: HashMap<_, _> = graph.nodes.iter().map(|n| (n.id, n.title.as_str())).collect();

    let mut by_degree: Vec<_> = graph.nodes.iter().collect();
    by_degree.sort_by(|a, b| b.connections.cmp(&a.connections).then_with(|| a.title.cmp(&b.title)));
    let orphans = by_degree.iter().filter(|n| n.connections == 0).count();

    println!();
    println!("{}", "Most connected".bold());
    for node in by_degree.iter().take(10).filter(|n| n.connections > 0) {
        println!("  {:>3}  {}", node.connections, node.title.cyan());
    }

    if !graph.edges.is_empty() {
        println!();
        println!("{}", "Links".bold());
        for edge in &graph.edges {
            // Targets may be in the trash.
            let target = titles.get(&edge.target).copied().unwrap_or("(trashed)");
            let source = titles.get(&edge.source).copied().unwrap_or("?");
            println!("  {} {} {}", source, "→".dimmed(), target);
        }
    }

    if orphans > 0 {
        println!();
        println!("  {} {} notes without links", "!".yellow(), orphans);
    }
    Ok(())
}
