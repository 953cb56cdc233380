//! Semantic search over a user's chunk corpus.
//!
//! Exhaustive linear scan ranked by cosine similarity, no index structure.
//! At the corpus sizes a single user accumulates this is both simpler and
//! fast enough; swapping in an ANN index would change this module only.

use anyhow::{bail, Context, Result};

use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::models::SearchResult;
use crate::store::Store;

/// Rank a user's chunks against `query` and return the top `top_k`.
///
/// Scope is either one document (which must belong to `user_id`) or the
/// user's whole corpus. An empty corpus yields an empty result, not an
/// error; a query embedding failure fails the whole call. Results are
/// sorted by descending score; ties keep their retrieval order.
pub async fn semantic_search(
    store: &dyn Store,
    embedder: &EmbeddingClient,
    user_id: &str,
    query: &str,
    document_id: Option<&str>,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    if top_k == 0 {
        bail!("top_k must be at least 1");
    }

    let query_vec = embedder
        .embed_one(query)
        .await
        .context("failed to embed query")?;

    let chunks = match document_id {
        Some(doc_id) => store.chunks_for_document(doc_id, user_id).await?,
        None => store.chunks_for_user(user_id).await?,
    };
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored: Vec<SearchResult> = chunks
        .into_iter()
        .map(|chunk| {
            let score = cosine_similarity(&query_vec, &chunk.embedding);
            SearchResult {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content,
                score,
            }
        })
        .collect();

    // sort_by is stable: equal scores keep retrieval order.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);

    Ok(scored)
}
