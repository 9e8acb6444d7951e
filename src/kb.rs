//! Knowledge base facade.
//!
//! Owns the store, the job pool and the two pipelines. Construct it once
//! with [`KnowledgeBase::open`] and release it with
//! [`KnowledgeBase::shutdown`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::ai::OllamaBackend;
use crate::core::config::CoreConfig;
use crate::core::error::{Error, Result};
use crate::core::note::{Note, NoteId, NoteUpdate, OwnerId};
use crate::graph::{GraphResponse, LinkGraphMaintainer, LinkUpdate};
use crate::jobs::{Job, JobEvent, JobPool};
use crate::rag::{AnswerGenerator, AskResponse, RagOrchestrator, SearchResponse};
use crate::search::{EmbeddingProvider, HarmonicEmbedder, RetrievalEngine};
use crate::store::{DocumentStore, IndexStats, NoteFilter};

const LAST_INDEXED_KEY: &str = "last_full_index";

/// External capabilities handed to the knowledge base at start-up.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub generator: Option<Arc<dyn AnswerGenerator>>,
}

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Ollama for both capabilities when `ollama.url` is set, otherwise the
    /// local harmonic embedder and no generator.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        match OllamaBackend::from_config(&config.ollama, config.retrieval.embedding_dim)? {
            Some(backend) => {
                let backend = Arc::new(backend);
                Ok(Self::none()
                    .with_embedder(backend.clone())
                    .with_generator(backend))
            }
            None => Ok(Self::none().with_embedder(Arc::new(HarmonicEmbedder::with_dimension(
                config.retrieval.embedding_dim,
            )))),
        }
    }
}

pub struct KnowledgeBase {
    store: Arc<dyn DocumentStore>,
    jobs: Arc<JobPool>,
    links: LinkGraphMaintainer,
    rag: RagOrchestrator,
    embedding_enabled: bool,
}

impl KnowledgeBase {
    /// Validate the configuration and start the job pool. Must be called
    /// inside a Tokio runtime.
    pub fn open(config: CoreConfig, store: Arc<dyn DocumentStore>, capabilities: Capabilities) -> Result<Self> {
        config.validate()?;
        if let Some(embedder) = &capabilities.embedder {
            if embedder.dimension() != config.retrieval.embedding_dim {
                return Err(Error::Config(format!(
                    "embedder {} produces {} dimensions, expected {}",
                    embedder.model_name(),
                    embedder.dimension(),
                    config.retrieval.embedding_dim
                )));
            }
        }

        let jobs = Arc::new(JobPool::start(
            store.clone(),
            capabilities.embedder.clone(),
            &config.jobs,
            &config.links,
        ));
        let links = LinkGraphMaintainer::new(store.clone(), jobs.clone(), config.links.prune_stale_backlinks);
        let engine = RetrievalEngine::new(
            store.clone(),
            capabilities.embedder.clone(),
            config.retrieval.clone(),
        );
        let rag = RagOrchestrator::new(engine, capabilities.generator.clone(), &config.context);

        info!(
            embedder = capabilities.embedder.as_ref().map(|e| e.model_name()).unwrap_or("none"),
            generator = capabilities.generator.as_ref().map(|g| g.model_name()).unwrap_or("none"),
            "Knowledge base opened"
        );
        Ok(Self {
            store,
            jobs,
            links,
            rag,
            embedding_enabled: capabilities.embedder.is_some(),
        })
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ===== Notes =====

    /// Create a note and schedule its link and embedding work.
    #[instrument(skip(self, body, tags), fields(owner_id = %owner))]
    pub async fn create_note(&self, owner: &OwnerId, title: &str, body: &str, tags: Vec<String>) -> Result<Note> {
        let title = validate_title(title)?;
        let mut note = Note::new(*owner, title, body).with_tags(tags);
        self.store.insert_note(&note)?;

        let update = self.links.on_note_saved(&note, body).await?;
        note.outbound_links = update.outbound;
        self.schedule_embedding(&note).await?;

        info!(note_id = %note.id, "Note created");
        Ok(note)
    }

    /// Apply `update`, bump the version and relink.
    #[instrument(skip(self, update), fields(owner_id = %owner, note_id = %id))]
    pub async fn save_note(&self, owner: &OwnerId, id: NoteId, update: NoteUpdate) -> Result<Note> {
        let prior = self.require_note(owner, id)?;
        if prior.is_deleted {
            return Err(Error::InvalidInput(format!("note {} is in the trash", id)));
        }

        let mut note = prior.clone();
        if let Some(title) = update.title {
            note.title = validate_title(&title)?.to_string();
        }
        if let Some(body) = update.body {
            note.body = body;
        }
        if let Some(tags) = update.tags {
            note.tags = tags;
        }
        note.version += 1;
        note.updated_at = Utc::now();
        self.store.update_note(&note)?;

        let links = self.links.on_note_saved(&prior, &note.body).await?;
        note.outbound_links = links.outbound;
        self.schedule_embedding(&note).await?;

        info!(version = note.version, "Note saved");
        Ok(note)
    }

    /// Re-resolve a note's links without changing it, e.g. after its
    /// targets were created.
    pub async fn relink(&self, owner: &OwnerId, id: NoteId) -> Result<LinkUpdate> {
        let note = self.require_note(owner, id)?;
        if note.is_deleted {
            return Err(Error::InvalidInput(format!("note {} is in the trash", id)));
        }
        self.links.on_note_saved(&note, &note.body).await
    }

    pub fn get_note(&self, owner: &OwnerId, id: NoteId) -> Result<Option<Note>> {
        self.store.get_note(owner, id)
    }

    pub fn list_notes(&self, owner: &OwnerId, filter: &NoteFilter) -> Result<Vec<Note>> {
        self.store.find_by_owner(owner, filter)
    }

    /// Soft-delete. Backlinks pointing from this note stay in place.
    pub fn trash(&self, owner: &OwnerId, id: NoteId) -> Result<Note> {
        let mut note = self.require_note(owner, id)?;
        if !note.is_deleted {
            note.is_deleted = true;
            note.deleted_at = Some(Utc::now());
            self.store.update_note(&note)?;
            info!(note_id = %id, "Note moved to trash");
        }
        Ok(note)
    }

    /// Undo [`trash`](Self::trash). The embedding is refreshed in case a
    /// job skipped the note while it was trashed.
    pub async fn restore(&self, owner: &OwnerId, id: NoteId) -> Result<Note> {
        let mut note = self.require_note(owner, id)?;
        if note.is_deleted {
            note.is_deleted = false;
            note.deleted_at = None;
            self.store.update_note(&note)?;
            self.schedule_embedding(&note).await?;
            info!(note_id = %id, "Note restored");
        }
        Ok(note)
    }

    /// Permanently delete and strip the note from every backlink set.
    pub fn purge(&self, owner: &OwnerId, id: NoteId) -> Result<()> {
        if !self.store.purge_note(owner, id)? {
            return Err(Error::NoteNotFound(id));
        }
        info!(note_id = %id, "Note purged");
        Ok(())
    }

    // ===== Retrieval =====

    pub async fn ask(&self, owner: &OwnerId, question: &str) -> Result<AskResponse> {
        self.rag.ask(owner, question).await
    }

    pub async fn ask_with_cancellation(
        &self,
        owner: &OwnerId,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<AskResponse> {
        self.rag.ask_with_cancellation(owner, question, cancel).await
    }

    pub async fn search(&self, owner: &OwnerId, query: &str, limit: usize) -> Result<SearchResponse> {
        self.rag.search(owner, query, limit).await
    }

    /// Notes similar to `id`, as candidates for new `[[links]]`.
    /// `limit` 0 means the default of five.
    pub async fn related(&self, owner: &OwnerId, id: NoteId, limit: usize) -> Result<SearchResponse> {
        let note = self.require_note(owner, id)?;
        if note.is_deleted {
            return Err(Error::InvalidInput(format!("note {} is in the trash", id)));
        }
        self.rag.related(&note, limit).await
    }

    pub fn graph(&self, owner: &OwnerId) -> Result<GraphResponse> {
        self.links.get_graph(owner)
    }

    // ===== Index maintenance =====

    /// Queue an embedding refresh for every non-deleted note of `owner`.
    /// Returns the number of jobs queued.
    pub async fn reindex(&self, owner: &OwnerId) -> Result<usize> {
        if !self.embedding_enabled {
            return Err(Error::CapabilityUnavailable("no embedding provider configured".into()));
        }
        let notes = self.store.find_by_owner(owner, &NoteFilter::active())?;
        for note in &notes {
            self.schedule_embedding(note).await?;
        }
        self.store
            .set_meta(LAST_INDEXED_KEY, &Utc::now().timestamp().to_string())?;
        info!(owner_id = %owner, queued = notes.len(), "Reindex queued");
        Ok(notes.len())
    }

    pub fn stats(&self, owner: Option<&OwnerId>) -> Result<IndexStats> {
        self.store.stats(owner)
    }

    // ===== Lifecycle =====

    /// Resolve once all background work submitted so far has finished.
    pub async fn wait_idle(&self) {
        self.jobs.wait_idle().await
    }

    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.events()
    }

    /// Finish queued background work and stop the workers.
    pub async fn shutdown(&self) -> Result<()> {
        self.jobs.shutdown().await?;
        info!("Knowledge base closed");
        Ok(())
    }

    fn require_note(&self, owner: &OwnerId, id: NoteId) -> Result<Note> {
        self.store.get_note(owner, id)?.ok_or(Error::NoteNotFound(id))
    }

    async fn schedule_embedding(&self, note: &Note) -> Result<()> {
        if !self.embedding_enabled {
            return Ok(());
        }
        self.jobs
            .submit(Job::RefreshEmbedding {
                note_id: note.id,
                version: note.version,
            })
            .await?;
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("title is required".into()));
    }
    Ok(title)
}
