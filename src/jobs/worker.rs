//! Background job pool for work triggered by note saves.
//!
//! Jobs go through a bounded queue consumed by a fixed number of worker
//! tasks. Delivery is at-least-once: failed jobs are retried with linear
//! backoff up to `max_attempts`. Every job is idempotent, and backlink jobs
//! reconcile against the source's current outbound set, so retried or
//! reordered jobs converge on the same backlinks.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::{JobConfig, LinkConfig};
use crate::core::error::{Error, Result};
use crate::core::note::{normalize_text, NoteId, OwnerId};
use crate::search::embedding::{prepare_text, EmbeddingProvider};
use crate::store::DocumentStore;

const EVENT_BUS_CAPACITY: usize = 256;

/// Work scheduled by a note save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Recompute the embedding of `note_id` as of `version`.
    RefreshEmbedding { note_id: NoteId, version: u64 },
    /// Add `source` to the backlink set of every target it still links to.
    AddBacklinks {
        owner: OwnerId,
        source: NoteId,
        targets: Vec<NoteId>,
    },
    /// Remove `source` from the backlink set of every target it no longer
    /// links to.
    RemoveBacklinks {
        owner: OwnerId,
        source: NoteId,
        targets: Vec<NoteId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    RefreshEmbedding,
    AddBacklinks,
    RemoveBacklinks,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::RefreshEmbedding { .. } => JobKind::RefreshEmbedding,
            Job::AddBacklinks { .. } => JobKind::AddBacklinks,
            Job::RemoveBacklinks { .. } => JobKind::RemoveBacklinks,
        }
    }
}

/// Event emitted by the job pool.
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobStarted { job_id: Uuid, kind: JobKind },
    JobCompleted { job_id: Uuid, kind: JobKind },
    /// A failed attempt that will be retried.
    JobRetrying {
        job_id: Uuid,
        kind: JobKind,
        attempt: u32,
        error: String,
    },
    /// Final failure after all attempts.
    JobFailed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    WorkerStarted { worker: usize },
    WorkerStopped { worker: usize },
}

struct QueuedJob {
    id: Uuid,
    job: Job,
}

/// Shared state used by every worker task.
#[derive(Clone)]
struct JobRunner {
    store: Arc<dyn DocumentStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    links: LinkConfig,
    max_attempts: u32,
    retry_backoff: Duration,
    event_tx: broadcast::Sender<JobEvent>,
    pending: Arc<watch::Sender<usize>>,
}

/// Bounded worker pool with an observable completion signal.
pub struct JobPool {
    tx: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    event_tx: broadcast::Sender<JobEvent>,
    pending_tx: Arc<watch::Sender<usize>>,
    pending_rx: watch::Receiver<usize>,
}

impl JobPool {
    /// Spawn `config.workers` worker tasks. Must be called inside a Tokio
    /// runtime.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: &JobConfig,
        links: &LinkConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedJob>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (pending_tx, pending_rx) = watch::channel(0usize);
        let pending_tx = Arc::new(pending_tx);

        let runner = JobRunner {
            store,
            embedder,
            links: links.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            event_tx: event_tx.clone(),
            pending: pending_tx.clone(),
        };

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let runner = runner.clone();
                let rx = rx.clone();
                tokio::spawn(async move { runner.run(worker, rx).await })
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            max_attempts = config.max_attempts,
            "Job pool started"
        );

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            event_tx,
            pending_tx,
            pending_rx,
        }
    }

    /// Queue a job. Waits for queue space when the queue is full.
    pub async fn submit(&self, job: Job) -> Result<Uuid> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| Error::Internal("job pool lock poisoned".into()))?
            .clone()
            .ok_or_else(|| Error::Job("job pool is shut down".into()))?;

        let id = Uuid::new_v4();
        debug!(job_id = %id, kind = ?job.kind(), "Queueing job");
        self.pending_tx.send_modify(|n| *n += 1);
        if tx.send(QueuedJob { id, job }).await.is_err() {
            self.pending_tx.send_modify(|n| *n = n.saturating_sub(1));
            return Err(Error::Job("job queue closed".into()));
        }
        Ok(id)
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        *self.pending_rx.borrow()
    }

    /// Resolve once every submitted job has finished (successfully or not).
    pub async fn wait_idle(&self) {
        let mut rx = self.pending_rx.clone();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Stop accepting jobs, drain the queue and join the workers.
    pub async fn shutdown(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| Error::Internal("job pool lock poisoned".into()))?
            .take();
        if tx.is_none() {
            return Ok(());
        }
        drop(tx);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map_err(|_| Error::Internal("job pool lock poisoned".into()))?
            .drain(..)
            .collect();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = ?e, "Job worker panicked");
            }
        }
        info!("Job pool stopped");
        Ok(())
    }
}

impl JobRunner {
    async fn run(self, worker: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>) {
        let _ = self.event_tx.send(JobEvent::WorkerStarted { worker });
        loop {
            let next = { rx.lock().await.recv().await };
            let Some(queued) = next else { break };
            self.process(queued).await;
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
        let _ = self.event_tx.send(JobEvent::WorkerStopped { worker });
        debug!(worker, "Job worker stopped");
    }

    #[instrument(skip(self, queued), fields(job_id = %queued.id, kind = ?queued.job.kind()))]
    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { id: job_id, job } = queued;
        let kind = job.kind();
        let start = Instant::now();
        let _ = self.event_tx.send(JobEvent::JobStarted { job_id, kind });

        let mut attempt = 1;
        loop {
            match self.execute(&job).await {
                Ok(()) => {
                    debug!(attempt, duration_ms = start.elapsed().as_millis() as u64, "Job completed");
                    let _ = self.event_tx.send(JobEvent::JobCompleted { job_id, kind });
                    return;
                }
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    warn!(attempt, error = %e, "Job attempt failed, retrying");
                    let _ = self.event_tx.send(JobEvent::JobRetrying {
                        job_id,
                        kind,
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Job failed");
                    let _ = self.event_tx.send(JobEvent::JobFailed {
                        job_id,
                        kind,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        match job {
            Job::RefreshEmbedding { note_id, version } => {
                self.refresh_embedding(*note_id, *version).await
            }
            Job::AddBacklinks {
                owner,
                source,
                targets,
            } => {
                // A job outlived by a later save only applies what that save
                // still links to.
                let Some(current) = self.store.get_note_by_id(*source)? else {
                    debug!(%source, "Source gone, skipping backlinks");
                    return Ok(());
                };
                for target in targets.iter().filter(|t| current.outbound_links.contains(t)) {
                    if self.store.add_backlink(owner, *target, *source)? {
                        debug!(%source, %target, "Backlink added");
                    }
                }
                Ok(())
            }
            Job::RemoveBacklinks {
                owner,
                source,
                targets,
            } => {
                let current = self.store.get_note_by_id(*source)?;
                for target in targets {
                    let still_linked = current
                        .as_ref()
                        .map(|n| n.outbound_links.contains(target))
                        .unwrap_or(false);
                    if still_linked {
                        continue;
                    }
                    if self.store.remove_backlink(owner, *target, *source)? {
                        debug!(%source, %target, "Stale backlink removed");
                    }
                }
                Ok(())
            }
        }
    }

    async fn refresh_embedding(&self, note_id: NoteId, version: u64) -> Result<()> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };
        let Some(note) = self.store.get_note_by_id(note_id)? else {
            debug!(%note_id, "Note gone, skipping embedding");
            return Ok(());
        };
        if note.version != version || note.is_deleted {
            debug!(%note_id, version, current = note.version, "Embedding job superseded");
            return Ok(());
        }

        // Bodies too short to carry meaning lose their embedding.
        if normalize_text(&note.body).chars().count() < self.links.min_embed_chars {
            self.store.set_embedding(note_id, &[], version)?;
            return Ok(());
        }
        let Some(text) = prepare_text(&note.embedding_text(), 1, self.links.max_embed_chars) else {
            return Ok(());
        };

        let vector = embedder.embed(&text).await;
        if vector.is_empty() {
            warn!(%note_id, model = embedder.model_name(), "Embedding unavailable, note stays lexical-only");
            return Ok(());
        }
        if !self.store.set_embedding(note_id, &vector, version)? {
            debug!(%note_id, version, "Embedding discarded, note changed meanwhile");
        }
        Ok(())
    }
}

/// Transient failures worth another attempt.
fn is_retryable(e: &Error) -> bool {
    matches!(
        e,
        Error::Database(_) | Error::Request(_) | Error::Io(_) | Error::Internal(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::ai::mock::MockEmbedder;
    use crate::core::note::Note;
    use crate::store::SqliteStore;

    const DIM: usize = 8;

    fn pool(store: Arc<SqliteStore>, embedder: Option<Arc<MockEmbedder>>) -> JobPool {
        let embedder = embedder.map(|e| e as Arc<dyn EmbeddingProvider>);
        JobPool::start(store, embedder, &JobConfig::default(), &LinkConfig::default())
    }

    #[test]
    fn test_job_kind() {
        let job = Job::RefreshEmbedding {
            note_id: NoteId::new(),
            version: 1,
        };
        assert_eq!(job.kind(), JobKind::RefreshEmbedding);
    }

    fn add(owner: OwnerId, source: NoteId, target: NoteId) -> Job {
        Job::AddBacklinks {
            owner,
            source,
            targets: vec![target],
        }
    }

    fn remove(owner: OwnerId, source: NoteId, target: NoteId) -> Job {
        Job::RemoveBacklinks {
            owner,
            source,
            targets: vec![target],
        }
    }

    async fn run(pool: &JobPool, job: Job) {
        pool.submit(job).await.unwrap();
        pool.wait_idle().await;
    }

    #[tokio::test]
    async fn test_backlink_jobs_apply_and_are_idempotent() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "target");
        let b = Note::new(owner, "B", "[[A]]");
        store.insert_note(&a).unwrap();
        store.insert_note(&b).unwrap();
        store.set_outbound_links(b.id, &BTreeSet::from([a.id])).unwrap();

        let pool = pool(store.clone(), None);
        pool.submit(add(owner, b.id, a.id)).await.unwrap();
        pool.submit(add(owner, b.id, a.id)).await.unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.pending(), 0);

        let a_now = store.get_note(&owner, a.id).unwrap().unwrap();
        assert_eq!(a_now.backlinks.len(), 1);
        assert!(a_now.backlinks.contains(&b.id));

        store.set_outbound_links(b.id, &BTreeSet::new()).unwrap();
        run(&pool, remove(owner, b.id, a.id)).await;
        assert!(store.get_note(&owner, a.id).unwrap().unwrap().backlinks.is_empty());
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_redelivered_backlink_jobs_follow_current_links() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "target");
        let b = Note::new(owner, "B", "");
        store.insert_note(&a).unwrap();
        store.insert_note(&b).unwrap();
        let pool = pool(store.clone(), None);

        // Saves: "[[A]]", then "none", then "[[A]] again".
        store.set_outbound_links(b.id, &BTreeSet::from([a.id])).unwrap();
        run(&pool, add(owner, b.id, a.id)).await;
        store.set_outbound_links(b.id, &BTreeSet::new()).unwrap();
        run(&pool, remove(owner, b.id, a.id)).await;
        store.set_outbound_links(b.id, &BTreeSet::from([a.id])).unwrap();
        run(&pool, add(owner, b.id, a.id)).await;

        // The second save's removal arrives again.
        run(&pool, remove(owner, b.id, a.id)).await;
        let b_now = store.get_note(&owner, b.id).unwrap().unwrap();
        let a_now = store.get_note(&owner, a.id).unwrap().unwrap();
        assert!(b_now.outbound_links.contains(&a.id));
        assert!(a_now.backlinks.contains(&b.id));

        // And an old addition arriving after the link was dropped is ignored.
        store.set_outbound_links(b.id, &BTreeSet::new()).unwrap();
        run(&pool, remove(owner, b.id, a.id)).await;
        run(&pool, add(owner, b.id, a.id)).await;
        assert!(store.get_note(&owner, a.id).unwrap().unwrap().backlinks.is_empty());
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_addition_for_purged_source_is_ignored() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "target");
        let b = Note::new(owner, "B", "[[A]]");
        store.insert_note(&a).unwrap();
        store.insert_note(&b).unwrap();
        store.set_outbound_links(b.id, &BTreeSet::from([a.id])).unwrap();
        let pool = pool(store.clone(), None);
        run(&pool, add(owner, b.id, a.id)).await;

        store.purge_note(&owner, b.id).unwrap();
        run(&pool, add(owner, b.id, a.id)).await;
        assert!(store.get_note(&owner, a.id).unwrap().unwrap().backlinks.is_empty());
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_embedding_is_version_guarded() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let embedder = Arc::new(MockEmbedder::new(DIM));
        let owner = OwnerId::generate();
        let mut note = Note::new(owner, "A", "capital of France is Paris");
        store.insert_note(&note).unwrap();

        note.version = 2;
        store.update_note(&note).unwrap();

        let pool = pool(store.clone(), Some(embedder.clone()));
        pool.submit(Job::RefreshEmbedding {
            note_id: note.id,
            version: 1,
        })
        .await
        .unwrap();
        pool.wait_idle().await;
        assert!(!store.get_note(&owner, note.id).unwrap().unwrap().has_embedding());
        assert_eq!(embedder.embed_call_count(), 0);

        pool.submit(Job::RefreshEmbedding {
            note_id: note.id,
            version: 2,
        })
        .await
        .unwrap();
        pool.wait_idle().await;
        let stored = store.get_note(&owner, note.id).unwrap().unwrap();
        assert_eq!(stored.embedding.len(), DIM);
        assert_eq!(embedder.inputs(), vec!["A capital of France is Paris"]);
    }

    #[tokio::test]
    async fn test_short_body_is_not_embedded() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let embedder = Arc::new(MockEmbedder::new(DIM));
        let owner = OwnerId::generate();
        let note = Note::new(owner, "Tiny", "hi");
        store.insert_note(&note).unwrap();

        let pool = pool(store.clone(), Some(embedder.clone()));
        pool.submit(Job::RefreshEmbedding {
            note_id: note.id,
            version: note.version,
        })
        .await
        .unwrap();
        pool.wait_idle().await;
        assert_eq!(embedder.embed_call_count(), 0);
        assert!(!store.get_note(&owner, note.id).unwrap().unwrap().has_embedding());
    }

    #[tokio::test]
    async fn test_events_and_shutdown() {
        let store = Arc::new(SqliteStore::open_in_memory(DIM).unwrap());
        let pool = pool(store, None);
        let mut events = pool.events();

        let id = pool
            .submit(Job::RefreshEmbedding {
                note_id: NoteId::new(),
                version: 1,
            })
            .await
            .unwrap();
        pool.wait_idle().await;

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if let JobEvent::JobCompleted { job_id, .. } = event {
                completed |= job_id == id;
            }
        }
        assert!(completed);

        pool.shutdown().await.unwrap();
        let err = pool
            .submit(Job::RefreshEmbedding {
                note_id: NoteId::new(),
                version: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        pool.shutdown().await.unwrap();
    }
}
