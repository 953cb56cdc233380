//! SQLite-backed [`Store`] implementation.
//!
//! Embeddings live in the chunk row as little-endian `f32` BLOBs; timestamps
//! are unix seconds. Schema in [`crate::migrate`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Chunk, Document, DocumentStatus};

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        filename: row.get("filename"),
        storage_path: row.get("storage_path"),
        status: status.parse::<DocumentStatus>()?,
        uploaded_at: timestamp(row.get("uploaded_at"))?,
        ready_at: row
            .get::<Option<i64>, _>("ready_at")
            .map(timestamp)
            .transpose()?,
        num_chunks: row.get("num_chunks"),
        error_message: row.get("error_message"),
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).with_context(|| format!("invalid timestamp: {}", secs))
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        user_id: row.get("user_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, filename, storage_path, status, uploaded_at, ready_at, num_chunks, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(&doc.filename)
        .bind(&doc.storage_path)
        .bind(doc.status.as_str())
        .bind(doc.uploaded_at.timestamp())
        .bind(doc.ready_at.map(|t| t.timestamp()))
        .bind(doc.num_chunks)
        .bind(&doc.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_document_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>> {
        let rows =
            sqlx::query("SELECT * FROM documents WHERE user_id = ? ORDER BY uploaded_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', ready_at = NULL, num_chunks = NULL, error_message = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
        Ok(())
    }

    async fn mark_ready(&self, id: &str, num_chunks: i64, ready_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'ready', ready_at = ?, num_chunks = ?, error_message = NULL WHERE id = ?",
        )
        .bind(ready_at.timestamp())
        .bind(num_chunks)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE documents SET status = 'failed', error_message = ? WHERE id = ?")
                .bind(error_message)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
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

        let mut tx = self.pool.begin().await?;

        // A re-ingestion replaces the previous batch wholesale.
        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (idx, (content, embedding)) in contents.iter().zip(embeddings.iter()).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, document_id, user_id, chunk_index, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(document_id)
            .bind(user_id)
            .bind(idx as i64)
            .bind(content)
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str, user_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.user_id, c.chunk_index, c.content, c.embedding
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.id = ? AND d.user_id = ?
            ORDER BY c.chunk_index
            "#,
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn chunks_for_user(&self, user_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.user_id, c.chunk_index, c.content, c.embedding
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = ?
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }
}
