//! In-memory [`Store`] implementation.
//!
//! `HashMap` and `Vec` behind `std::sync::RwLock`; the whole store fits the
//! pipeline's contracts without SQLite, which makes it the backend of choice
//! for tests and for embedding the engine in-process.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Chunk, Document, DocumentStatus};

use super::Store;

#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn get_document_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Document>> {
        Ok(self
            .docs
            .read()
            .unwrap()
            .get(id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .unwrap()
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(docs)
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        let Some(doc) = docs.get_mut(id) else {
            bail!("document {} not found", id);
        };
        doc.status = DocumentStatus::Processing;
        doc.ready_at = None;
        doc.num_chunks = None;
        doc.error_message = None;
        Ok(())
    }

    async fn mark_ready(&self, id: &str, num_chunks: i64, ready_at: DateTime<Utc>) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        let Some(doc) = docs.get_mut(id) else {
            bail!("document {} not found", id);
        };
        doc.status = DocumentStatus::Ready;
        doc.ready_at = Some(ready_at);
        doc.num_chunks = Some(num_chunks);
        doc.error_message = None;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        let Some(doc) = docs.get_mut(id) else {
            bail!("document {} not found", id);
        };
        doc.status = DocumentStatus::Failed;
        doc.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn insert_chunks(
        &self,
        document_id: &str,
        user_id: &str,
        contents: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        if contents.len() != embeddings.len() {
            bail!(
                "chunk/embedding count mismatch: {} chunks, {} embeddings",
                contents.len(),
                embeddings.len()
            );
        }

        // Build the replacement batch first so the swap below is atomic
        // under the write lock.
        let batch: Vec<Chunk> = contents
            .iter()
            .zip(embeddings.iter())
            .enumerate()
            .map(|(idx, (content, embedding))| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                user_id: user_id.to_string(),
                chunk_index: idx as i64,
                content: content.clone(),
                embedding: embedding.clone(),
            })
            .collect();

        let mut chunks = self.chunks.write().unwrap();
        chunks.retain(|c| c.document_id != document_id);
        chunks.extend(batch);
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str, user_id: &str) -> Result<Vec<Chunk>> {
        let owned = self
            .docs
            .read()
            .unwrap()
            .get(document_id)
            .is_some_and(|d| d.user_id == user_id);
        if !owned {
            return Ok(Vec::new());
        }

        let mut result: Vec<Chunk> = self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        result.sort_by_key(|c| c.chunk_index);
        Ok(result)
    }

    async fn chunks_for_user(&self, user_id: &str) -> Result<Vec<Chunk>> {
        let owned_docs: Vec<String> = self
            .docs
            .read()
            .unwrap()
            .values()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.id.clone())
            .collect();

        let mut result: Vec<Chunk> = self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| owned_docs.iter().any(|id| id == &c.document_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(result)
    }
}
