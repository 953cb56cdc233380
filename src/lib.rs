//! # docqa
//!
//! A document ingestion and retrieval-augmented question answering engine.
//!
//! Documents are registered, then asynchronously extracted, chunked, and
//! embedded by a queue-driven worker pool; questions are answered by
//! cosine-ranked semantic search over the owner's chunks followed by a
//! grounded, citation-checked LLM answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Queue   │──▶│     Ingestion Worker      │──▶│  SQLite   │
//! │ (jobs)   │   │ extract → chunk → embed  │   │ chunks +  │
//! └──────────┘   └──────────────────────────┘   │ lifecycle │
//!                                               └────┬─────┘
//!                                                    │
//!                              ┌─────────────────────┤
//!                              ▼                     ▼
//!                        ┌──────────┐         ┌──────────┐
//!                        │  Search  │────────▶│ Answerer  │
//!                        │ (cosine) │         │ (RAG)     │
//!                        └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Extension-keyed text extraction (PDF, DOCX, plain text) |
//! | [`chunk`] | Overlapping sliding-window chunking |
//! | [`embedding`] | Embedding provider, rate-limited client, vector math |
//! | [`llm`] | Chat model access for answer generation |
//! | [`provider`] | Shared provider error taxonomy and retry policy |
//! | [`store`] | Document + chunk persistence (SQLite, in-memory) |
//! | [`queue`] | Ingestion job transport |
//! | [`worker`] | Queue-driven ingestion worker pool |
//! | [`search`] | Semantic search |
//! | [`chat`] | RAG answerer with citation validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod queue;
pub mod search;
pub mod store;
pub mod worker;
