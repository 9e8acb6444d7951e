//! End-to-end behaviour of the knowledge base over an in-memory SQLite store.

use std::sync::Arc;

use mindvault::ai::mock::{MockEmbedder, MockGenerator};
use mindvault::core::config::{ContextConfig, NO_RELEVANT_NOTES_ANSWER};
use mindvault::store::NoteFilter;
use mindvault::{
    Capabilities, ContextAssembler, CoreConfig, Error, KnowledgeBase, NoteId, NoteUpdate, OwnerId,
    RetrievalCandidate, SqliteStore, StoreCapabilities, Tier,
};

const DIM: usize = 768;

fn store(vector_search: bool, text_search: bool) -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::open_in_memory(DIM)
            .unwrap()
            .with_capabilities(StoreCapabilities {
                vector_search,
                text_search,
            }),
    )
}

fn open(store: Arc<SqliteStore>, capabilities: Capabilities) -> KnowledgeBase {
    KnowledgeBase::open(CoreConfig::default(), store, capabilities).unwrap()
}

async fn note(kb: &KnowledgeBase, owner: &OwnerId, title: &str, body: &str) -> NoteId {
    kb.create_note(owner, title, body, Vec::new()).await.unwrap().id
}

#[tokio::test]
async fn search_without_embedder_never_uses_vector_tier() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    kb.wait_idle().await;

    let response = kb.search(&owner, "France", 0).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(response.results.iter().all(|hit| hit.score.is_none()));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn search_with_embedder_reports_vector_scores() {
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let kb = open(store(true, true), Capabilities::none().with_embedder(embedder.clone()));
    let owner = OwnerId::generate();
    note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    kb.wait_idle().await;

    let response = kb.search(&owner, "capital of France", 5).await.unwrap();
    assert_eq!(response.results.len(), 1);
    let score = response.results[0].score.unwrap();
    assert!((0.0..=1.0).contains(&score));
    // One call for the note, one for the query.
    assert_eq!(embedder.embed_call_count(), 2);
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn fulltext_answers_when_vector_search_is_unavailable() {
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let kb = open(store(false, true), Capabilities::none().with_embedder(embedder));
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    note(&kb, &owner, "Berlin", "Berlin is the capital of Germany").await;
    kb.wait_idle().await;

    let response = kb.search(&owner, "France", 0).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, a);
    assert!(response.results[0].score.is_none());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn keyword_tier_is_the_last_resort() {
    let kb = open(store(false, false), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    note(&kb, &owner, "Tokyo", "Tokyo is large").await;

    let response = kb.search(&owner, "tell me about france", 0).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, a);
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn retrieval_is_scoped_to_owner() {
    let kb = open(store(true, true), Capabilities::none());
    let alice = OwnerId::generate();
    let bob = OwnerId::generate();
    note(&kb, &alice, "Paris", "Paris is the capital of France").await;

    let response = kb.search(&bob, "France", 0).await.unwrap();
    assert!(response.results.is_empty());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_owner_is_the_only_retrieval_error() {
    assert!(matches!(OwnerId::parse("not-a-uuid"), Err(Error::InvalidOwner(_))));

    let kb = open(store(false, false), Capabilities::none());
    let owner = OwnerId::generate();
    let response = kb.search(&owner, "anything at all", 0).await.unwrap();
    assert!(response.results.is_empty());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn backlink_is_created_for_resolved_link() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "capital of France").await;
    let b = note(&kb, &owner, "Trip", "we visited [[Paris]] in May").await;
    kb.wait_idle().await;

    let graph = kb.graph(&owner).unwrap();
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].source, b);
    assert_eq!(graph.edges[0].target, a);
    let paris = graph.nodes.iter().find(|n| n.id == a).unwrap();
    assert_eq!(paris.connections, 1);

    let paris = kb.get_note(&owner, a).unwrap().unwrap();
    assert!(paris.backlinks.contains(&b));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn unresolved_link_is_dropped_silently() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let b = note(&kb, &owner, "Trip", "see [[Nowhere]]").await;
    kb.wait_idle().await;

    let trip = kb.get_note(&owner, b).unwrap().unwrap();
    assert!(trip.outbound_links.is_empty());
    assert!(kb.graph(&owner).unwrap().edges.is_empty());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn repeated_saves_do_not_duplicate_backlinks() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "capital of France").await;
    let b = note(&kb, &owner, "Trip", "[[Paris]] and [[Paris]] again").await;
    kb.wait_idle().await;

    let update = NoteUpdate {
        body: Some("still [[Paris]]".into()),
        ..Default::default()
    };
    kb.save_note(&owner, b, update).await.unwrap();
    kb.wait_idle().await;

    let paris = kb.get_note(&owner, a).unwrap().unwrap();
    assert_eq!(paris.backlinks.len(), 1);
    assert!(!kb.store().add_backlink(&owner, a, b).unwrap());
    let paris = kb.get_note(&owner, a).unwrap().unwrap();
    assert_eq!(paris.backlinks.len(), 1);
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn removing_a_link_prunes_the_backlink() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "capital of France").await;
    let b = note(&kb, &owner, "Trip", "see [[Paris]]").await;
    kb.wait_idle().await;

    let update = NoteUpdate {
        body: Some("no links anymore".into()),
        ..Default::default()
    };
    let saved = kb.save_note(&owner, b, update).await.unwrap();
    assert_eq!(saved.version, 2);
    kb.wait_idle().await;

    let paris = kb.get_note(&owner, a).unwrap().unwrap();
    assert!(paris.backlinks.is_empty());
    assert!(kb.graph(&owner).unwrap().edges.is_empty());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn ask_without_candidates_skips_generation() {
    let generator = Arc::new(MockGenerator::new("should not be used"));
    let kb = open(
        store(false, false),
        Capabilities::none().with_generator(generator.clone()),
    );
    let owner = OwnerId::generate();

    let response = kb.ask(&owner, "what is the capital of France?").await.unwrap();
    assert_eq!(response.answer, NO_RELEVANT_NOTES_ANSWER);
    assert!(response.sources.is_empty());
    assert_eq!(generator.generate_call_count(), 0);
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn ask_grounds_answer_on_retrieved_notes() {
    let generator = Arc::new(MockGenerator::new("Paris."));
    let kb = open(
        store(true, true),
        Capabilities::none().with_generator(generator.clone()),
    );
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "Paris is the capital of France").await;

    let response = kb.ask(&owner, "France").await.unwrap();
    assert_eq!(response.answer, "Paris.");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].id, a);
    assert_eq!(generator.generate_call_count(), 1);
    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("[Note 1: \"Paris\"]"));
    assert!(prompt.contains("France"));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn generation_failure_is_reported() {
    let generator = Arc::new(MockGenerator::failing("quota exceeded"));
    let kb = open(store(true, true), Capabilities::none().with_generator(generator));
    let owner = OwnerId::generate();
    note(&kb, &owner, "Paris", "Paris is the capital of France").await;

    let err = kb.ask(&owner, "France").await.unwrap_err();
    assert!(matches!(err, Error::Generation(_)));
    kb.shutdown().await.unwrap();
}

#[test]
fn assembled_context_respects_budget() {
    let candidates: Vec<RetrievalCandidate> = (0..5)
        .map(|i| RetrievalCandidate {
            id: NoteId::new(),
            title: format!("Note number {}", i),
            snippet: "word ".repeat(400),
            score: 0.5,
            tier: Tier::Fulltext,
        })
        .collect();
    let assembler = ContextAssembler::new(&ContextConfig::default());
    for max in [0, 10, 100, 1000, 4000, 100_000] {
        let context = assembler.assemble(&candidates, max);
        assert!(context.chars().count() <= max, "max {} got {}", max, context.chars().count());
    }
}

#[tokio::test]
async fn trash_restore_and_purge() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    let b = note(&kb, &owner, "Trip", "see [[Paris]]").await;
    kb.wait_idle().await;

    kb.trash(&owner, a).unwrap();
    assert!(kb.search(&owner, "France", 0).await.unwrap().results.is_empty());
    assert_eq!(kb.list_notes(&owner, &NoteFilter::trash()).unwrap().len(), 1);

    kb.restore(&owner, a).await.unwrap();
    assert_eq!(kb.search(&owner, "France", 0).await.unwrap().results.len(), 1);

    kb.purge(&owner, b).unwrap();
    let paris = kb.get_note(&owner, a).unwrap().unwrap();
    assert!(paris.backlinks.is_empty());
    assert!(matches!(kb.purge(&owner, b), Err(Error::NoteNotFound(_))));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn reindex_requires_embedder() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    assert!(matches!(
        kb.reindex(&owner).await,
        Err(Error::CapabilityUnavailable(_))
    ));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn reindex_embeds_every_active_note() {
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let kb = open(store(true, true), Capabilities::none().with_embedder(embedder));
    let owner = OwnerId::generate();
    note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    note(&kb, &owner, "Berlin", "Berlin is the capital of Germany").await;
    kb.wait_idle().await;

    assert_eq!(kb.reindex(&owner).await.unwrap(), 2);
    kb.wait_idle().await;
    let stats = kb.stats(Some(&owner)).unwrap();
    assert_eq!(stats.embedding_count, 2);
    assert!(stats.last_indexed.is_some());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn shared_titles_and_self_references_all_link() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a1 = note(&kb, &owner, "A", "first").await;
    let a2 = note(&kb, &owner, "A", "second").await;
    let me = note(&kb, &owner, "Me", "[[A]] [[Me]]").await;
    kb.wait_idle().await;

    let me_note = kb.get_note(&owner, me).unwrap().unwrap();
    assert_eq!(me_note.outbound_links.len(), 3);
    for target in [a1, a2, me] {
        assert!(me_note.outbound_links.contains(&target));
        let note = kb.get_note(&owner, target).unwrap().unwrap();
        assert!(note.backlinks.contains(&me));
    }
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn related_notes_exclude_the_source() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let paris = note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    let lyon = note(&kb, &owner, "Lyon", "Lyon is a city in France").await;
    note(&kb, &owner, "Other", "unrelated words").await;

    let response = kb.related(&owner, paris, 0).await.unwrap();
    assert!(response.results.iter().all(|hit| hit.id != paris));
    assert!(response.results.iter().any(|hit| hit.id == lyon));

    kb.trash(&owner, paris).unwrap();
    assert!(matches!(
        kb.related(&owner, paris, 0).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        kb.related(&owner, NoteId::new(), 0).await,
        Err(Error::NoteNotFound(_))
    ));
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn purged_target_leaves_no_dangling_edge() {
    let kb = open(store(true, true), Capabilities::none());
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "capital of France").await;
    let b = note(&kb, &owner, "Trip", "see [[Paris]]").await;
    kb.wait_idle().await;

    kb.purge(&owner, a).unwrap();
    let graph = kb.graph(&owner).unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.edges.is_empty());
    assert!(kb.get_note(&owner, b).unwrap().unwrap().outbound_links.is_empty());
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn ollama_capabilities_follow_configured_dimension() {
    let mut config = CoreConfig::default();
    config.retrieval.embedding_dim = 384;
    config.ollama.url = Some("http://127.0.0.1:11434".into());
    let capabilities = Capabilities::from_config(&config).unwrap();
    let store = Arc::new(SqliteStore::open_in_memory(384).unwrap());

    let kb = KnowledgeBase::open(config, store, capabilities).unwrap();
    kb.shutdown().await.unwrap();
}

#[tokio::test]
async fn restore_refreshes_a_missing_embedding() {
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let kb = open(store(true, true), Capabilities::none().with_embedder(embedder));
    let owner = OwnerId::generate();
    let a = note(&kb, &owner, "Paris", "Paris is the capital of France").await;
    kb.wait_idle().await;

    // Trashed before its embedding landed.
    let trashed = kb.trash(&owner, a).unwrap();
    assert!(kb.store().set_embedding(a, &[], trashed.version).unwrap());
    assert!(!kb.get_note(&owner, a).unwrap().unwrap().has_embedding());

    kb.restore(&owner, a).await.unwrap();
    kb.wait_idle().await;
    assert!(kb.get_note(&owner, a).unwrap().unwrap().has_embedding());
    kb.shutdown().await.unwrap();
}
