mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Session;

#[derive(Parser)]
#[command(name = "mindvault")]
#[command(about = "Personal knowledge base with linked notes and grounded answers", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "MINDVAULT_DB", default_value = "mindvault.db")]
    db: PathBuf,

    /// YAML configuration file
    #[arg(long, global = true, env = "MINDVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Owner id (uuid) acting on the knowledge base
    #[arg(long, global = true, env = "MINDVAULT_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ===== Notes =====
    /// Create a note
    Add {
        title: String,
        #[arg(long, help = "Note body")]
        body: Option<String>,
        #[arg(long, help = "Read the body from a file")]
        file: Option<PathBuf>,
        #[arg(long = "tag", help = "Tag (repeatable)")]
        tags: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Update a note's title, body or tags
    Edit {
        id: String,
        #[arg(long, help = "New title")]
        title: Option<String>,
        #[arg(long, help = "New body")]
        body: Option<String>,
        #[arg(long, help = "Read the new body from a file")]
        file: Option<PathBuf>,
        #[arg(long = "tag", help = "Replace tags (repeatable)")]
        tags: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show a note with its links
    Show {
        id: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List notes, most recently updated first
    List {
        #[arg(long, help = "List trashed notes")]
        trash: bool,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Move a note to the trash
    Trash {
        id: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Restore a trashed note
    Restore {
        id: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Permanently delete a note
    Purge {
        id: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Retrieval =====
    /// Search notes (vector, then full-text, then keyword)
    #[command(alias = "s")]
    Search {
        query: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Answer a question from your notes
    Ask {
        question: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Suggest notes to link from a note
    Related {
        id: String,
        #[arg(long, short, help = "Limit results (default: 5)")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show the note link graph
    Graph {
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Index =====
    /// Re-embed all notes
    Index {
        #[arg(long, help = "Show index status only")]
        status: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Import a directory of markdown files
    Import {
        dir: PathBuf,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server over stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show client configuration instructions")]
        install: bool,
    },
}

fn init_tracing() {
    // stdout belongs to command output and the MCP transport.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    #[cfg(feature = "mcp")]
    {
        if let Commands::Mcp { install: true } = cli.command {
            print_mcp_install_instructions(&cli.db, cli.owner.as_deref());
            return Ok(());
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let session = Session::open(&cli.db, cli.config.as_deref(), cli.owner.as_deref())?;
        let result = dispatch(&session, &cli.db, cli.command).await;
        session.close().await?;
        result
    })
}

async fn dispatch(session: &Session, db: &std::path::Path, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Add {
            title,
            body,
            file,
            tags,
            json,
        } => commands::notes::add(session, &title, body, file.as_deref(), tags, json).await,
        Commands::Edit {
            id,
            title,
            body,
            file,
            tags,
            json,
        } => {
            let tags = (!tags.is_empty()).then_some(tags);
            commands::notes::edit(session, &id, title, body, file.as_deref(), tags, json).await
        }
        Commands::Show { id, json } => commands::notes::show(session, &id, json),
        Commands::List { trash, limit, json } => commands::notes::list(session, trash, limit, json),
        Commands::Trash { id, json } => commands::notes::trash(session, &id, json),
        Commands::Restore { id, json } => commands::notes::restore(session, &id, json).await,
        Commands::Purge { id, json } => commands::notes::purge(session, &id, json),

        Commands::Search { query, limit, json } => {
            commands::search::run(session, &query, limit, json).await
        }
        Commands::Ask { question, json } => commands::ask::run(session, &question, json).await,
        Commands::Related { id, limit, json } => {
            commands::related::run(session, &id, limit, json).await
        }
        Commands::Graph { json } => commands::graph::run(session, json),

        Commands::Index { status, json } => commands::index::run(session, db, status, json).await,
        Commands::Import { dir, json } => commands::import::run(session, &dir, json).await,

        #[cfg(feature = "mcp")]
        Commands::Mcp { .. } => mcp::run_mcp_server(session).await,
    }
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(db: &std::path::Path, owner: Option<&str>) {
    use colored::Colorize;

    let db_path = std::fs::canonicalize(db)
        .unwrap_or_else(|_| db.to_path_buf())
        .to_string_lossy()
        .to_string();
    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "mindvault".to_string());
    let owner = owner.unwrap_or("<owner-uuid>");

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(
        r#"{{
  "mcpServers": {{
    "mindvault": {{
      "command": "{}",
      "args": ["--db", "{}", "--owner", "{}", "mcp"]
    }}
  }}
}}"#,
        binary_path, db_path, owner
    );
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Tiered search over notes", "kb_search".green());
    println!("  • {} - Grounded answer with sources", "kb_ask".green());
    println!("  • {} - Link suggestions for a note", "kb_related".green());
    println!("  • {} - Note link graph", "kb_graph".green());
    println!("  • {} - Get full note content", "kb_get_note".green());
}
