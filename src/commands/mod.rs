//! CLI subcommands.

pub mod ask;
pub mod graph;
pub mod import;
pub mod index;
pub mod notes;
pub mod related;
pub mod search;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use mindvault::{Capabilities, CoreConfig, KnowledgeBase, NoteId, OwnerId, SqliteStore};

/// An opened knowledge base plus the acting owner.
pub struct Session {
    pub kb: Arc<KnowledgeBase>,
    owner: Option<OwnerId>,
}

impl Session {
    /// Load config, open the SQLite store at `db` and start the knowledge
    /// base. Must be called inside a Tokio runtime.
    pub fn open(db: &Path, config: Option<&Path>, owner: Option<&str>) -> Result<Self> {
        let owner = owner
            .map(OwnerId::parse)
            .transpose()
            .context("Invalid --owner")?;

        let config = CoreConfig::load(config).context("Failed to load configuration")?;
        if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let store = SqliteStore::open(db, config.retrieval.embedding_dim)
            .with_context(|| format!("Failed to open database {}", db.display()))?;
        let capabilities = Capabilities::from_config(&config)?;
        let kb = KnowledgeBase::open(config, Arc::new(store), capabilities)?;

        Ok(Self {
            kb: Arc::new(kb),
            owner,
        })
    }

    /// Owner given by `--owner` / `MINDVAULT_OWNER`.
    pub fn owner(&self) -> Result<&OwnerId> {
        self.owner
            .as_ref()
            .context("No owner given. Pass --owner <uuid> or set MINDVAULT_OWNER")
    }

    /// Drain background work and stop the job pool.
    pub async fn close(self) -> Result<()> {
        self.kb.shutdown().await?;
        Ok(())
    }
}

pub fn parse_note_id(s: &str) -> Result<NoteId> {
    s.parse().with_context(|| format!("Invalid note id: {}", s))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Char-aware truncation with an ellipsis, for terminal output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}
