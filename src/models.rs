//! Core data types that flow through the ingestion and retrieval pipeline.

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Processing state of a document.
///
/// The state moves forward only: `Processing` → `Ready` | `Failed`. Nothing
/// leaves a terminal state except a new ingestion attempt, which re-enters
/// `Processing` explicitly via the store's `mark_processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            other => bail!("unknown document status: {}", other),
        }
    }
}

/// A registered upload and its ingestion outcome.
///
/// Created at upload time in `Processing`; mutated only by the ingestion
/// worker. `ready_at` and `num_chunks` are set on success, `error_message`
/// on failure.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    /// Opaque locator for the raw bytes. This implementation reads it as a
    /// local filesystem path.
    pub storage_path: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub num_chunks: Option<i64>,
    pub error_message: Option<String>,
}

impl Document {
    /// A freshly registered document, in the initial `processing` state.
    pub fn new(user_id: &str, filename: &str, storage_path: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            storage_path: storage_path.to_string(),
            status: DocumentStatus::Processing,
            uploaded_at: Utc::now(),
            ready_at: None,
            num_chunks: None,
            error_message: None,
        }
    }
}

/// One embedded slice of a document's extracted text.
///
/// Chunk batches are write-once: a single ingestion attempt inserts the
/// whole batch with contiguous `chunk_index` values starting at 0, and a
/// re-ingestion replaces the batch wholesale. `user_id` is denormalized from
/// the owning document so scoped reads never widen beyond one user.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A ranked hit from semantic search. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
}

/// A grounded answer with the sources that back it. Transient; returned to
/// the HTTP layer as-is.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<CitedSource>,
}

/// A validated citation: the cited chunk and its retrieval score.
#[derive(Debug, Clone, Serialize)]
pub struct CitedSource {
    pub chunk_id: String,
    pub relevance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            let parsed: DocumentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_new_document_starts_processing() {
        let doc = Document::new("u1", "report.pdf", "/tmp/report.pdf");
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert!(doc.ready_at.is_none());
        assert!(doc.num_chunks.is_none());
        assert!(doc.error_message.is_none());
    }
}
