//! Link graph maintenance: `[[Title]]` references, outbound links and
//! backlinks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::core::error::Result;
use crate::core::note::{Note, NoteId, OwnerId};
use crate::core::wikilink::{extract_links, unique_titles, LinkReference};
use crate::jobs::{Job, JobPool};
use crate::store::{DocumentStore, NoteFilter};

/// Outcome of re-linking one saved note.
#[derive(Debug, Clone, Serialize)]
pub struct LinkUpdate {
    /// Every reference in body order, duplicates kept
    pub references: Vec<LinkReference>,
    /// New outbound link set
    pub outbound: BTreeSet<NoteId>,
    /// Targets no longer referenced since the previous save
    pub removed: BTreeSet<NoteId>,
}

impl LinkUpdate {
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.references
            .iter()
            .filter(|r| !r.is_resolved())
            .map(|r| r.title.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: NoteId,
    pub title: String,
    pub tags: Vec<String>,
    pub connections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: NoteId,
    pub target: NoteId,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphResponse {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

pub struct LinkGraphMaintainer {
    store: Arc<dyn DocumentStore>,
    jobs: Arc<JobPool>,
    prune_stale_backlinks: bool,
}

impl LinkGraphMaintainer {
    pub fn new(store: Arc<dyn DocumentStore>, jobs: Arc<JobPool>, prune_stale_backlinks: bool) -> Self {
        Self {
            store,
            jobs,
            prune_stale_backlinks,
        }
    }

    /// Recompute `note`'s outbound links from `new_body`.
    ///
    /// `note` is the state before the save; its outbound set is overwritten
    /// synchronously. Backlink updates on the targets are queued on the job
    /// pool. Unresolved titles are dropped without error.
    #[instrument(skip(self, note, new_body), fields(note_id = %note.id, owner_id = %note.owner_id))]
    pub async fn on_note_saved(&self, note: &Note, new_body: &str) -> Result<LinkUpdate> {
        let mut references = extract_links(new_body);
        let resolved = self.resolve(&note.owner_id, &unique_titles(&references))?;
        for reference in &mut references {
            reference.resolved = resolved.get(&reference.title).cloned().unwrap_or_default();
        }

        let outbound: BTreeSet<NoteId> = references
            .iter()
            .flat_map(|r| r.resolved.iter().copied())
            .collect();
        self.store.set_outbound_links(note.id, &outbound)?;

        let removed: BTreeSet<NoteId> = note.outbound_links.difference(&outbound).copied().collect();

        // Every current target is re-sent; adding a backlink is idempotent.
        if !outbound.is_empty() {
            self.jobs
                .submit(Job::AddBacklinks {
                    owner: note.owner_id,
                    source: note.id,
                    targets: outbound.iter().copied().collect(),
                })
                .await?;
        }
        if self.prune_stale_backlinks && !removed.is_empty() {
            self.jobs
                .submit(Job::RemoveBacklinks {
                    owner: note.owner_id,
                    source: note.id,
                    targets: removed.iter().copied().collect(),
                })
                .await?;
        }

        debug!(
            references = references.len(),
            outbound = outbound.len(),
            removed = removed.len(),
            "Links updated"
        );
        Ok(LinkUpdate {
            references,
            outbound,
            removed,
        })
    }

    /// Map each title to every non-deleted note of the owner with exactly
    /// that title, the saved note itself included.
    fn resolve(&self, owner: &OwnerId, titles: &[String]) -> Result<HashMap<String, Vec<NoteId>>> {
        let mut resolved: HashMap<String, Vec<NoteId>> = HashMap::new();
        if titles.is_empty() {
            return Ok(resolved);
        }
        for candidate in self.store.find_by_titles(owner, titles)? {
            resolved.entry(candidate.title).or_default().push(candidate.id);
        }
        for title in titles.iter().filter(|t| !resolved.contains_key(*t)) {
            trace!(%title, "Unresolved link");
        }
        Ok(resolved)
    }

    /// Nodes are the owner's non-deleted notes; edges are their outbound
    /// links.
    #[instrument(skip(self), fields(owner_id = %owner))]
    pub fn get_graph(&self, owner: &OwnerId) -> Result<GraphResponse> {
        let notes = self.store.find_by_owner(owner, &NoteFilter::active())?;

        let nodes = notes
            .iter()
            .map(|n| GraphNode {
                id: n.id,
                title: n.title.clone(),
                tags: n.tags.clone(),
                connections: n.connection_count(),
            })
            .collect();
        let edges = notes
            .iter()
            .flat_map(|n| {
                n.outbound_links.iter().map(move |target| GraphEdge {
                    source: n.id,
                    target: *target,
                })
            })
            .collect::<Vec<_>>();

        debug!(edges = edges.len(), "Graph built");
        Ok(GraphResponse { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{JobConfig, LinkConfig};
    use crate::store::SqliteStore;

    fn setup(prune: bool) -> (Arc<SqliteStore>, Arc<JobPool>, LinkGraphMaintainer) {
        let store = Arc::new(SqliteStore::open_in_memory(8).unwrap());
        let jobs = Arc::new(JobPool::start(
            store.clone(),
            None,
            &JobConfig::default(),
            &LinkConfig::default(),
        ));
        let links = LinkGraphMaintainer::new(store.clone(), jobs.clone(), prune);
        (store, jobs, links)
    }

    async fn save(store: &SqliteStore, links: &LinkGraphMaintainer, note: &mut Note, body: &str) -> LinkUpdate {
        let prior = store
            .get_note(&note.owner_id, note.id)
            .unwrap()
            .unwrap_or_else(|| note.clone());
        let update = links.on_note_saved(&prior, body).await.unwrap();
        note.body = body.to_string();
        note.outbound_links = update.outbound.clone();
        update
    }

    #[tokio::test]
    async fn test_edge_and_connection_count() {
        let (store, jobs, links) = setup(true);
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "capital of France is Paris");
        store.insert_note(&a).unwrap();
        let mut b = Note::new(owner, "B", "");
        store.insert_note(&b).unwrap();

        save(&store, &links, &mut b, "[[A]] mentions geography").await;
        jobs.wait_idle().await;

        let graph = links.get_graph(&owner).unwrap();
        assert_eq!(graph.edges, vec![GraphEdge { source: b.id, target: a.id }]);
        let node_a = graph.nodes.iter().find(|n| n.id == a.id).unwrap();
        assert_eq!(node_a.connections, 1);
    }

    #[tokio::test]
    async fn test_unresolved_links_are_dropped() {
        let (store, _jobs, links) = setup(true);
        let owner = OwnerId::generate();
        let mut n = Note::new(owner, "N", "");
        store.insert_note(&n).unwrap();

        let update = save(&store, &links, &mut n, "see [[Z]] and [[Z]]").await;
        assert!(update.outbound.is_empty());
        assert_eq!(update.references.len(), 2);
        assert_eq!(update.unresolved().collect::<Vec<_>>(), vec!["Z", "Z"]);
        assert!(store.get_note(&owner, n.id).unwrap().unwrap().outbound_links.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_and_prune() {
        let (store, jobs, links) = setup(true);
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "a");
        let c = Note::new(owner, "C", "c");
        store.insert_note(&a).unwrap();
        store.insert_note(&c).unwrap();
        let mut b = Note::new(owner, "B", "");
        store.insert_note(&b).unwrap();

        save(&store, &links, &mut b, "[[A]] [[C]]").await;
        jobs.wait_idle().await;
        let update = save(&store, &links, &mut b, "[[C]] only").await;
        jobs.wait_idle().await;

        assert_eq!(update.removed, BTreeSet::from([a.id]));
        let b_now = store.get_note(&owner, b.id).unwrap().unwrap();
        assert_eq!(b_now.outbound_links, BTreeSet::from([c.id]));
        assert!(store.get_note(&owner, a.id).unwrap().unwrap().backlinks.is_empty());
        assert!(store.get_note(&owner, c.id).unwrap().unwrap().backlinks.contains(&b.id));
    }

    #[tokio::test]
    async fn test_stale_backlinks_kept_without_pruning() {
        let (store, jobs, links) = setup(false);
        let owner = OwnerId::generate();
        let a = Note::new(owner, "A", "a");
        store.insert_note(&a).unwrap();
        let mut b = Note::new(owner, "B", "");
        store.insert_note(&b).unwrap();

        save(&store, &links, &mut b, "[[A]]").await;
        jobs.wait_idle().await;
        save(&store, &links, &mut b, "nothing").await;
        jobs.wait_idle().await;

        assert!(store.get_note(&owner, a.id).unwrap().unwrap().backlinks.contains(&b.id));
    }

    #[tokio::test]
    async fn test_resolution_is_owner_scoped_and_skips_deleted() {
        let (store, _jobs, links) = setup(true);
        let owner = OwnerId::generate();
        let other = OwnerId::generate();
        store.insert_note(&Note::new(other, "Foreign", "x")).unwrap();
        let mut gone = Note::new(owner, "Gone", "x");
        gone.is_deleted = true;
        store.insert_note(&gone).unwrap();
        let mut me = Note::new(owner, "Me", "");
        store.insert_note(&me).unwrap();

        let update = save(&store, &links, &mut me, "[[Foreign]] [[Gone]]").await;
        assert!(update.outbound.is_empty());
    }

    #[tokio::test]
    async fn test_shared_titles_and_self_references_all_resolve() {
        let (store, jobs, links) = setup(true);
        let owner = OwnerId::generate();
        let a1 = Note::new(owner, "A", "first");
        let a2 = Note::new(owner, "A", "second");
        store.insert_note(&a1).unwrap();
        store.insert_note(&a2).unwrap();
        let mut me = Note::new(owner, "Me", "");
        store.insert_note(&me).unwrap();

        let update = save(&store, &links, &mut me, "[[A]] [[Me]]").await;
        jobs.wait_idle().await;

        assert_eq!(update.outbound, BTreeSet::from([a1.id, a2.id, me.id]));
        assert_eq!(update.references[0].resolved.len(), 2);
        assert_eq!(update.references[1].resolved, vec![me.id]);
        for target in [a1.id, a2.id, me.id] {
            let note = store.get_note(&owner, target).unwrap().unwrap();
            assert!(note.backlinks.contains(&me.id));
        }
    }
}
