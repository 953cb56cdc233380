//! The ingestion worker: drives one document from raw bytes to embedded,
//! persisted chunks, and guarantees the document ends in a terminal state.
//!
//! `run_job` is the failure boundary: whatever goes wrong after the document
//! lookup (extraction, chunking, embedding, persistence) is recorded as a
//! `failed` status (message truncated) before the error propagates, so the
//! queue's own retry bookkeeping sees the failure but the document is never
//! stranded in `processing`.
//!
//! `run_pool` is the consumer loop: a bounded number of job slots pulled
//! from a [`JobQueue`], acked on success and nacked on failure. No ordering
//! is guaranteed between documents; within a document, chunk ordinals come
//! from the batch order, never from embedding completion order.
//!
//! Concurrent attempts for the same document are not coordinated; enqueuers
//! must not double-enqueue a document that is still processing.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, WorkerConfig};
use crate::embedding::EmbeddingClient;
use crate::extract::extract_text;
use crate::models::{Document, DocumentStatus};
use crate::queue::{IngestJob, JobQueue};
use crate::store::Store;

/// Most of a failure reason a document row will hold.
const ERROR_MESSAGE_MAX_CHARS: usize = 1000;

/// Process one ingestion job, leaving the document in a terminal state.
///
/// A missing document is fatal for the job and is not recorded anywhere;
/// there is no row to record it on. Every other failure marks the document
/// `failed` and then propagates. Returns the chunk count on success.
pub async fn run_job(
    store: &dyn Store,
    embedder: &EmbeddingClient,
    chunking: &ChunkingConfig,
    job: &IngestJob,
) -> Result<usize> {
    let Some(doc) = store.get_document(&job.document_id).await? else {
        bail!("document {} not found", job.document_id);
    };

    // A redelivered job finds the previous attempt's terminal state; restart
    // the lifecycle explicitly.
    if doc.status != DocumentStatus::Processing {
        store.mark_processing(&doc.id).await?;
    }

    match ingest_document(store, embedder, chunking, &doc).await {
        Ok(num_chunks) => Ok(num_chunks),
        Err(err) => {
            let message = truncate_error(&format!("{err:#}"));
            if let Err(update_err) = store.mark_failed(&doc.id, &message).await {
                tracing::error!(
                    document_id = %doc.id,
                    error = %update_err,
                    "could not record ingestion failure"
                );
            }
            Err(err)
        }
    }
}

/// One end-to-end ingestion attempt: extract → chunk → embed → persist →
/// ready.
async fn ingest_document(
    store: &dyn Store,
    embedder: &EmbeddingClient,
    chunking: &ChunkingConfig,
    doc: &Document,
) -> Result<usize> {
    let text = extract_text(Path::new(&doc.storage_path))
        .with_context(|| format!("failed to extract text from {}", doc.filename))?;

    let chunks = chunk_text(&text, chunking.max_chars, chunking.overlap);
    tracing::debug!(document_id = %doc.id, chunks = chunks.len(), "split document");

    let embeddings = embedder
        .embed_batch(&chunks)
        .await
        .context("failed to embed chunk batch")?;

    store
        .insert_chunks(&doc.id, &doc.user_id, &chunks, &embeddings)
        .await
        .context("failed to persist chunk batch")?;

    let num_chunks = chunks.len();
    store.mark_ready(&doc.id, num_chunks as i64, Utc::now()).await?;
    Ok(num_chunks)
}

/// Consume jobs until the queue drains, with a fixed number of concurrent
/// job slots.
pub async fn run_pool(
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn Store>,
    embedder: Arc<EmbeddingClient>,
    chunking: ChunkingConfig,
    worker: &WorkerConfig,
) -> Result<()> {
    let slots = Arc::new(Semaphore::new(worker.concurrency.max(1)));
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        // Pull everything currently deliverable.
        loop {
            // Hold a slot before dequeuing so jobs are not pulled off the
            // queue just to sit in memory.
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let Some(job) = queue.dequeue().await? else {
                drop(permit);
                break;
            };

            let queue = Arc::clone(&queue);
            let store = Arc::clone(&store);
            let embedder = Arc::clone(&embedder);
            let chunking = chunking.clone();
            tasks.spawn(async move {
                let _slot = permit;
                match run_job(store.as_ref(), &embedder, &chunking, &job).await {
                    Ok(num_chunks) => {
                        tracing::info!(
                            document_id = %job.document_id,
                            chunks = num_chunks,
                            "ingestion complete"
                        );
                        if let Err(err) = queue.ack(&job).await {
                            tracing::warn!(document_id = %job.document_id, error = %err, "ack failed");
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            document_id = %job.document_id,
                            attempt = job.attempt,
                            error = %format!("{err:#}"),
                            "ingestion failed"
                        );
                        if let Err(nack_err) = queue.nack(&job).await {
                            tracing::warn!(document_id = %job.document_id, error = %nack_err, "nack failed");
                        }
                    }
                }
            });
        }

        if tasks.is_empty() {
            return Ok(());
        }
        // A failed job may have been redelivered while we drained; loop
        // around and check the queue again.
        while tasks.join_next().await.is_some() {}
    }
}

/// First [`ERROR_MESSAGE_MAX_CHARS`] characters of a failure reason.
fn truncate_error(message: &str) -> String {
    message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;

    use crate::config::EmbeddingConfig;
    use crate::embedding::EmbeddingProvider;
    use crate::models::Chunk;
    use crate::provider::ProviderError;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    struct ConstantProvider;

    #[async_trait]
    impl EmbeddingProvider for ConstantProvider {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Auth("key revoked".into()))
        }
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>) -> EmbeddingClient {
        let config = EmbeddingConfig {
            max_retries: 0,
            base_delay_ms: 0,
            min_interval_ms: 0,
            ..EmbeddingConfig::default()
        };
        EmbeddingClient::new(provider, &config)
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            max_chars: 100,
            overlap: 20,
        }
    }

    async fn registered_doc(store: &MemoryStore, user: &str, path: &Path) -> Document {
        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        let doc = Document::new(user, &filename, &path.to_string_lossy());
        store.insert_document(&doc).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_successful_ingestion_marks_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world ".repeat(40)).unwrap();

        let store = MemoryStore::new();
        let doc = registered_doc(&store, "u1", &path).await;
        let client = embedder(Arc::new(ConstantProvider));

        let num_chunks = run_job(&store, &client, &chunking(), &IngestJob::new(&doc.id))
            .await
            .unwrap();
        assert!(num_chunks > 1);

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert_eq!(loaded.num_chunks, Some(num_chunks as i64));
        assert!(loaded.ready_at.is_some());
        assert!(loaded.error_message.is_none());

        let chunks = store.chunks_for_document(&doc.id, "u1").await.unwrap();
        assert_eq!(chunks.len(), num_chunks);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[tokio::test]
    async fn test_missing_file_marks_failed() {
        let store = MemoryStore::new();
        let doc = Document::new("u1", "ghost.txt", "/nonexistent/ghost.txt");
        store.insert_document(&doc).await.unwrap();
        let client = embedder(Arc::new(ConstantProvider));

        let result = run_job(&store, &client, &chunking(), &IngestJob::new(&doc.id)).await;
        assert!(result.is_err());

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Failed);
        assert!(loaded.error_message.is_some());
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_failed_and_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "some document text").unwrap();

        let store = MemoryStore::new();
        let doc = registered_doc(&store, "u1", &path).await;
        let client = embedder(Arc::new(BrokenProvider));

        let result = run_job(&store, &client, &chunking(), &IngestJob::new(&doc.id)).await;
        assert!(result.is_err());

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Failed);
        assert!(loaded
            .error_message
            .as_deref()
            .unwrap()
            .contains("failed to embed"));
        assert!(store
            .chunks_for_document(&doc.id, "u1")
            .await
            .unwrap()
            .is_empty());
    }

    /// Store wrapper that fails every chunk write.
    struct FailingChunkStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for FailingChunkStore {
        async fn insert_document(&self, doc: &Document) -> Result<()> {
            self.inner.insert_document(doc).await
        }
        async fn get_document(&self, id: &str) -> Result<Option<Document>> {
            self.inner.get_document(id).await
        }
        async fn get_document_for_user(
            &self,
            id: &str,
            user_id: &str,
        ) -> Result<Option<Document>> {
            self.inner.get_document_for_user(id, user_id).await
        }
        async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>> {
            self.inner.list_documents(user_id).await
        }
        async fn mark_processing(&self, id: &str) -> Result<()> {
            self.inner.mark_processing(id).await
        }
        async fn mark_ready(
            &self,
            id: &str,
            num_chunks: i64,
            ready_at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.mark_ready(id, num_chunks, ready_at).await
        }
        async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
            self.inner.mark_failed(id, error_message).await
        }
        async fn insert_chunks(
            &self,
            _document_id: &str,
            _user_id: &str,
            _contents: &[String],
            _embeddings: &[Vec<f32>],
        ) -> Result<()> {
            bail!("disk full")
        }
        async fn chunks_for_document(
            &self,
            document_id: &str,
            user_id: &str,
        ) -> Result<Vec<Chunk>> {
            self.inner.chunks_for_document(document_id, user_id).await
        }
        async fn chunks_for_user(&self, user_id: &str) -> Result<Vec<Chunk>> {
            self.inner.chunks_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "some document text").unwrap();

        let store = FailingChunkStore {
            inner: MemoryStore::new(),
        };
        let filename = "notes.txt";
        let doc = Document::new("u1", filename, &path.to_string_lossy());
        store.insert_document(&doc).await.unwrap();
        let client = embedder(Arc::new(ConstantProvider));

        let result = run_job(&store, &client, &chunking(), &IngestJob::new(&doc.id)).await;
        assert!(result.is_err());

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Failed);
        assert!(loaded.error_message.as_deref().unwrap().contains("persist"));
    }

    #[tokio::test]
    async fn test_unknown_document_is_an_error_without_status_writes() {
        let store = MemoryStore::new();
        let client = embedder(Arc::new(ConstantProvider));

        let result = run_job(&store, &client, &chunking(), &IngestJob::new("missing")).await;
        assert!(result.is_err());
        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivered_job_restarts_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");

        let store = MemoryStore::new();
        let doc = registered_doc(&store, "u1", &path).await;
        let client = embedder(Arc::new(ConstantProvider));

        // First delivery fails (file does not exist yet).
        let job = IngestJob::new(&doc.id);
        assert!(run_job(&store, &client, &chunking(), &job).await.is_err());
        let failed = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);

        // The file appears; the redelivered attempt recovers.
        std::fs::write(&path, "now it exists").unwrap();
        let retry = IngestJob {
            document_id: doc.id.clone(),
            attempt: 2,
        };
        run_job(&store, &client, &chunking(), &retry).await.unwrap();
        let ready = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(ready.status, DocumentStatus::Ready);
        assert!(ready.error_message.is_none());
    }

    #[test]
    fn test_error_message_truncated() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_error(&long).chars().count(), 1000);
        assert_eq!(truncate_error("short"), "short");
    }

    #[tokio::test]
    async fn test_pool_processes_all_jobs_to_terminal_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new(2));
        let client = Arc::new(embedder(Arc::new(ConstantProvider)));

        let mut ids = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("doc{i}.txt"));
            std::fs::write(&path, format!("document number {i} ").repeat(30)).unwrap();
            let doc = registered_doc(&store, "u1", &path).await;
            queue.enqueue(IngestJob::new(&doc.id)).await.unwrap();
            ids.push(doc.id);
        }
        // One document whose file never existed; it exhausts its attempts.
        let ghost = Document::new("u1", "ghost.txt", "/nonexistent/ghost.txt");
        store.insert_document(&ghost).await.unwrap();
        queue.enqueue(IngestJob::new(&ghost.id)).await.unwrap();
        ids.push(ghost.id.clone());

        queue.close();
        run_pool(
            queue,
            Arc::clone(&store) as Arc<dyn Store>,
            client,
            chunking(),
            &WorkerConfig {
                concurrency: 2,
                max_attempts: 2,
            },
        )
        .await
        .unwrap();

        for id in &ids {
            let doc = store.get_document(id).await.unwrap().unwrap();
            assert_ne!(
                doc.status,
                DocumentStatus::Processing,
                "document {} left in processing",
                id
            );
        }
        let ghost_doc = store.get_document(&ghost.id).await.unwrap().unwrap();
        assert_eq!(ghost_doc.status, DocumentStatus::Failed);
    }
}
