//! End-to-end pipeline tests over the in-memory store and queue, with fake
//! embedding and chat providers: register → ingest (worker pool) → search →
//! answer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use docqa::chat::{self, NO_ANSWER};
use docqa::config::{ChunkingConfig, EmbeddingConfig, WorkerConfig};
use docqa::embedding::{EmbeddingClient, EmbeddingProvider};
use docqa::llm::ChatModel;
use docqa::models::{Document, DocumentStatus};
use docqa::provider::ProviderError;
use docqa::queue::{IngestJob, JobQueue, MemoryQueue};
use docqa::search::semantic_search;
use docqa::store::{MemoryStore, Store};
use docqa::worker;

/// Deterministic embedding: letter-frequency bag over a..z, normalized.
/// Texts about the same words land close together, which is all the
/// pipeline needs from a real embedding model.
struct BagOfCharsEmbedder;

#[async_trait]
impl EmbeddingProvider for BagOfCharsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-chars"
    }

    fn dims(&self) -> usize {
        26
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut counts = [0.0f32; 26];
        for c in text.chars().flat_map(|c| c.to_lowercase()) {
            if c.is_ascii_lowercase() {
                counts[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        let norm = counts.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in counts.iter_mut() {
                *x /= norm;
            }
        }
        Ok(counts.to_vec())
    }
}

/// Chat model replaying a fixed reply, counting calls.
struct ScriptedChat {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedChat {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate_json(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn embedder() -> Arc<EmbeddingClient> {
    let config = EmbeddingConfig {
        max_retries: 1,
        base_delay_ms: 0,
        min_interval_ms: 0,
        ..EmbeddingConfig::default()
    };
    Arc::new(EmbeddingClient::new(Arc::new(BagOfCharsEmbedder), &config))
}

fn chunking(max_chars: usize, overlap: usize) -> ChunkingConfig {
    ChunkingConfig { max_chars, overlap }
}

fn worker_config(concurrency: usize, max_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        max_attempts,
    }
}

/// Register a file as a document and enqueue its ingestion job.
async fn register(
    store: &dyn Store,
    queue: &MemoryQueue,
    user: &str,
    path: &std::path::Path,
) -> String {
    let filename = path.file_name().unwrap().to_string_lossy().to_string();
    let doc = Document::new(user, &filename, &path.to_string_lossy());
    store.insert_document(&doc).await.unwrap();
    queue.enqueue(IngestJob::new(&doc.id)).await.unwrap();
    doc.id
}

async fn drain_pool(
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryStore>,
    chunking_cfg: ChunkingConfig,
    worker_cfg: &WorkerConfig,
) {
    queue.close();
    worker::run_pool(
        queue,
        store as Arc<dyn Store>,
        embedder(),
        chunking_cfg,
        worker_cfg,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_ingest_search_ask_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let zebra_path = dir.path().join("zebras.txt");
    let fruit_path = dir.path().join("fruit.txt");
    std::fs::write(&zebra_path, "zebra zebra zoo zebra stripes zebra ".repeat(10)).unwrap();
    std::fs::write(&fruit_path, "apple banana cherry fig plum apple ".repeat(10)).unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(3));
    let zebra_id = register(store.as_ref(), &queue, "alice", &zebra_path).await;
    let fruit_id = register(store.as_ref(), &queue, "alice", &fruit_path).await;

    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(200, 40),
        &worker_config(2, 3),
    )
    .await;

    // Both documents reached ready with their chunk counts recorded.
    for id in [&zebra_id, &fruit_id] {
        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert!(doc.num_chunks.unwrap() > 0);
        assert!(doc.ready_at.is_some());
    }

    // The zebra document dominates a zebra query.
    let client = embedder();
    let results = semantic_search(store.as_ref(), &client, "alice", "zebra stripes", None, 5)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, zebra_id);
    assert!(results[0].score > 0.3);

    // The answerer cites the top source.
    let llm = ScriptedChat::new("{\"answer\":\"Zebras have stripes.\",\"citations\":[1]}");
    let response = chat::answer(
        store.as_ref(),
        &client,
        &llm,
        "alice",
        "zebra stripes",
        None,
        5,
    )
    .await
    .unwrap();
    assert_eq!(response.answer, "Zebras have stripes.");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].chunk_id, results[0].chunk_id);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_failed_ingestion_ends_terminal_after_retries() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(2));

    let ghost = Document::new("alice", "ghost.txt", "/nonexistent/ghost.txt");
    store.insert_document(&ghost).await.unwrap();
    queue.enqueue(IngestJob::new(&ghost.id)).await.unwrap();

    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(200, 40),
        &worker_config(2, 2),
    )
    .await;

    let doc = store.get_document(&ghost.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    let message = doc.error_message.unwrap();
    assert!(!message.is_empty());
    assert!(message.chars().count() <= 1000);
}

#[tokio::test]
async fn test_cross_user_corpus_is_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.txt");
    std::fs::write(&path, "alpha beta gamma delta ".repeat(20)).unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(3));
    let doc_id = register(store.as_ref(), &queue, "alice", &path).await;

    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(200, 40),
        &worker_config(1, 3),
    )
    .await;

    let client = embedder();

    // Another user sees nothing, via corpus search or document scope.
    let corpus = semantic_search(store.as_ref(), &client, "mallory", "alpha beta", None, 5)
        .await
        .unwrap();
    assert!(corpus.is_empty());
    let scoped = semantic_search(
        store.as_ref(),
        &client,
        "mallory",
        "alpha beta",
        Some(&doc_id),
        5,
    )
    .await
    .unwrap();
    assert!(scoped.is_empty());

    // And the answerer refuses without consulting the model.
    let llm = ScriptedChat::new("{\"answer\":\"leaked\",\"citations\":[1]}");
    let response = chat::answer(
        store.as_ref(),
        &client,
        &llm,
        "mallory",
        "alpha beta",
        None,
        5,
    )
    .await
    .unwrap();
    assert_eq!(response.answer, NO_ANSWER);
    assert!(response.sources.is_empty());
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_messy_citations_are_normalized_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("words.txt");
    // Enough text for at least five chunks at max_chars 100.
    std::fs::write(&path, "wombat wallaby wombat kangaroo wombat ".repeat(30)).unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(3));
    let doc_id = register(store.as_ref(), &queue, "alice", &path).await;

    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(100, 10),
        &worker_config(2, 3),
    )
    .await;

    let doc = store.get_document(&doc_id).await.unwrap().unwrap();
    assert!(doc.num_chunks.unwrap() >= 5);

    let client = embedder();
    let results = semantic_search(store.as_ref(), &client, "alice", "wombat kangaroo", None, 5)
        .await
        .unwrap();
    assert_eq!(results.len(), 5);

    let llm = ScriptedChat::new("{\"answer\":\"Wombats.\",\"citations\":[1,1,7,\"x\",3]}");
    let response = chat::answer(
        store.as_ref(),
        &client,
        &llm,
        "alice",
        "wombat kangaroo",
        None,
        5,
    )
    .await
    .unwrap();

    // {1, 3} survive, in that order, mapped onto the prompt's ordering.
    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.sources[0].chunk_id, results[0].chunk_id);
    assert_eq!(response.sources[1].chunk_id, results[2].chunk_id);
}

#[tokio::test]
async fn test_reingestion_replaces_rather_than_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.txt");
    std::fs::write(&path, "repeatable deterministic content ".repeat(20)).unwrap();

    let store = Arc::new(MemoryStore::new());

    let queue = Arc::new(MemoryQueue::new(3));
    let doc_id = register(store.as_ref(), &queue, "alice", &path).await;
    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(150, 30),
        &worker_config(1, 3),
    )
    .await;

    let first_count = store
        .chunks_for_document(&doc_id, "alice")
        .await
        .unwrap()
        .len();
    assert!(first_count > 0);

    // A second ingestion attempt for the same document replaces the batch.
    let queue = Arc::new(MemoryQueue::new(3));
    queue.enqueue(IngestJob::new(&doc_id)).await.unwrap();
    drain_pool(
        Arc::clone(&queue),
        Arc::clone(&store),
        chunking(150, 30),
        &worker_config(1, 3),
    )
    .await;

    let chunks = store.chunks_for_document(&doc_id, "alice").await.unwrap();
    assert_eq!(chunks.len(), first_count);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
    }
    let doc = store.get_document(&doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
}
