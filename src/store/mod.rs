//! Persistence for documents and their chunk batches.
//!
//! The [`Store`] trait is everything the pipeline needs from the relational
//! backend, enabling pluggable implementations (SQLite for the binary, an
//! in-memory store for tests and embedded use).
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_document`](Store::insert_document) | Register an upload |
//! | [`get_document`](Store::get_document) | Look up by id |
//! | [`get_document_for_user`](Store::get_document_for_user) | Look up with ownership check |
//! | [`list_documents`](Store::list_documents) | A user's uploads, newest first |
//! | [`mark_processing`](Store::mark_processing) | Re-enter `processing` for a new attempt |
//! | [`mark_ready`](Store::mark_ready) | Terminal success |
//! | [`mark_failed`](Store::mark_failed) | Terminal failure |
//! | [`insert_chunks`](Store::insert_chunks) | Write a chunk batch atomically |
//! | [`chunks_for_document`](Store::chunks_for_document) | Scoped read, one document |
//! | [`chunks_for_user`](Store::chunks_for_user) | Scoped read, whole corpus |
//!
//! Chunk reads are always scoped through document ownership: a chunk is
//! returned only when its owning document belongs to the requesting user.
//! Both backends are tested for that: cross-user leakage is a correctness
//! bug, not a privacy nicety.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Chunk, Document};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Register a new document row.
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Look up a document by id, unscoped. Used by the ingestion worker,
    /// which receives ids from the trusted queue.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Look up a document by id, only if it belongs to `user_id`.
    async fn get_document_for_user(&self, id: &str, user_id: &str)
        -> Result<Option<Document>>;

    /// All of a user's documents, newest upload first.
    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>>;

    /// Explicitly restart the lifecycle for a new ingestion attempt:
    /// status back to `processing`, terminal fields cleared.
    async fn mark_processing(&self, id: &str) -> Result<()>;

    /// Terminal success: sets `ready_at` and `num_chunks`, clears the error.
    async fn mark_ready(&self, id: &str, num_chunks: i64, ready_at: DateTime<Utc>) -> Result<()>;

    /// Terminal failure: records the (already truncated) error message.
    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()>;

    /// Write a chunk batch for one document, all-or-nothing.
    ///
    /// Requires `contents.len() == embeddings.len()`. Replaces any previous
    /// batch for the document and assigns ordinals `0..n-1` in input order,
    /// inside a single transaction, so a mid-batch failure leaves nothing
    /// behind.
    async fn insert_chunks(
        &self,
        document_id: &str,
        user_id: &str,
        contents: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<()>;

    /// Chunks of one document, provided it belongs to `user_id`.
    async fn chunks_for_document(&self, document_id: &str, user_id: &str) -> Result<Vec<Chunk>>;

    /// Every chunk across a user's documents.
    async fn chunks_for_user(&self, user_id: &str) -> Result<Vec<Chunk>>;
}
