//! Retrieval-augmented answering with citation validation.
//!
//! The answerer runs semantic search, refuses to answer when the retrieved
//! context is too weak (the grounding guard), and otherwise asks the chat
//! model to answer strictly from the numbered sources. The model's citation
//! list is treated as untrusted input: deduplicated, filtered to integers
//! within the candidate range, and mapped back onto the exact ordering used
//! to build the prompt. An invalid citation is dropped, never guessed at.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};

use crate::embedding::EmbeddingClient;
use crate::llm::ChatModel;
use crate::models::{ChatResponse, CitedSource, SearchResult};
use crate::search::semantic_search;
use crate::store::Store;

/// Minimum top-result similarity before the model is consulted at all.
pub const SIMILARITY_THRESHOLD: f32 = 0.3;

/// The canonical refusal when retrieval finds nothing relevant.
pub const NO_ANSWER: &str = "I don't know based on the provided documents.";

/// Answer `query` from the user's documents, with cited sources.
///
/// Short-circuits to [`NO_ANSWER`], without invoking the chat model, when
/// search returns nothing or the best score is below
/// [`SIMILARITY_THRESHOLD`]. An unparseable model reply is a hard error; an
/// answer whose citations all fail validation is returned with an empty
/// sources list.
pub async fn answer(
    store: &dyn Store,
    embedder: &EmbeddingClient,
    llm: &dyn ChatModel,
    user_id: &str,
    query: &str,
    document_id: Option<&str>,
    top_k: usize,
) -> Result<ChatResponse> {
    let results = semantic_search(store, embedder, user_id, query, document_id, top_k).await?;

    if results.is_empty() || results[0].score < SIMILARITY_THRESHOLD {
        return Ok(ChatResponse {
            answer: NO_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    let prompt = build_rag_prompt(query, &results);
    let raw = llm
        .generate_json(&prompt)
        .await
        .context("chat model request failed")?;
    let reply = parse_reply(&raw).context("chat model returned an unparseable reply")?;

    let citations = normalize_citations(&reply.citations, results.len());
    let sources = citations
        .iter()
        .map(|&n| {
            // 1-based citation onto the same ordering the prompt enumerated.
            let hit = &results[n - 1];
            CitedSource {
                chunk_id: hit.chunk_id.clone(),
                relevance: hit.score,
            }
        })
        .collect();

    Ok(ChatResponse {
        answer: reply.answer,
        sources,
    })
}

/// Enumerate the retrieved chunks as numbered sources and instruct the model
/// to answer only from them, in JSON.
pub fn build_rag_prompt(query: &str, hits: &[SearchResult]) -> String {
    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("Source {}:\n{}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an assistant answering questions using ONLY the provided sources.

Rules:
- Use ONLY the information in the sources.
- Do NOT use outside knowledge.
- If the answer is not found, return JSON where answer is exactly "I don't know" and citations is an empty array.

Citation rules:
- Each source has a numeric ID (1, 2, 3, ...).
- Citations MUST be source numbers.
- Do NOT invent citations.
- Do NOT include citations not used in the answer.
- Citations array MUST NOT be empty if answer is not "I don't know".

Output rules:
- Return ONLY valid JSON.
- Do NOT include markdown.
- Do NOT include explanations.
- Do NOT include text outside JSON.

JSON format:
{{
  "answer": string,
  "citations": number[]
}}

Sources:
{context}

Question:
{query}
"#
    )
}

struct ModelReply {
    answer: String,
    citations: Vec<serde_json::Value>,
}

/// Parse the model's raw reply as `{ answer, citations }`.
///
/// Code fences are tolerated (models wrap JSON in them despite
/// instructions); anything else that fails to parse is an error. A missing
/// citations array is read as empty, equivalent to a reply with no
/// verifiable grounding.
fn parse_reply(raw: &str) -> Result<ModelReply> {
    let cleaned = strip_code_fences(raw.trim());
    let value: serde_json::Value =
        serde_json::from_str(cleaned).context("reply is not valid JSON")?;

    let answer = value
        .get("answer")
        .and_then(|a| a.as_str())
        .ok_or_else(|| anyhow!("reply has no answer field"))?
        .to_string();
    let citations = value
        .get("citations")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(ModelReply { answer, citations })
}

fn strip_code_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest).trim()
}

/// Reduce a raw citation list to unique integers within
/// `[1, max_sources]`, keeping first-seen order. Everything else (floats,
/// strings, out-of-range numbers) is dropped silently.
pub fn normalize_citations(raw: &[serde_json::Value], max_sources: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for value in raw {
        let Some(n) = value.as_i64() else { continue };
        if n < 1 || n > max_sources as i64 {
            continue;
        }
        let n = n as usize;
        if seen.insert(n) {
            citations.push(n);
        }
    }

    citations
}
