//! # Research Harness
//!
//! Question answering for support agents over three document pools:
//! remediation scripts, knowledge base articles, and past ticket
//! resolutions.
//!
//! Retrieval is hybrid (cosine similarity + FTS5 bm25, fused with
//! weighted RRF). Simple questions get a classified, reranked result
//! list; complex ones are decomposed into sub-queries, searched
//! concurrently, merged, and synthesized into an evidence-backed report
//! whose citations are checked against the retrieved candidates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ rh import   │──▶│ Embed (batch)│──▶│  SQLite   │
//! │ JSONL docs  │   │              │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │ DocumentIndex
//!                                           ▼
//!                                   ┌──────────────┐
//!                                   │   Pipeline   │
//!                                   │ agents + RRF │
//!                                   └──────┬───────┘
//!                          ┌───────────────┤
//!                          ▼               ▼
//!                     ┌──────────┐   ┌──────────┐
//!                     │   CLI    │   │   HTTP   │
//!                     │  (rh)    │   │  (axum)  │
//!                     └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`agents`] | Pipeline stages, fan-out, simple/research pipelines, gap evaluation, KB drafts |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`generation`] | OpenAI / Ollama chat providers |
//! | [`http`] | Shared JSON POST with retry and backoff |
//! | [`sqlite_index`] | SQLite `DocumentIndex` (cosine + FTS5) |
//! | [`import`] | JSONL document import |
//! | [`eval`] | Retrieval evaluation |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agents;
pub mod config;
pub mod db;
pub mod embedding;
pub mod eval;
pub mod generation;
pub mod http;
pub mod import;
pub mod migrate;
pub mod server;
pub mod sqlite_index;
