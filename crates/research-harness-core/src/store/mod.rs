//! Read-only document index abstraction.
//!
//! The [`DocumentIndex`] trait is the only storage surface the research
//! pipeline sees: one semantic and one lexical query per pool. Backends
//! (SQLite, in-memory) own the documents, embeddings, and lexical index;
//! the core never writes through this trait.
//!
//! Implementations must be `Send + Sync` so one index can serve
//! concurrent fan-out searches.

pub mod memory;

use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::models::{Document, Pool, SearchHit};

/// Default length of `content_preview`, in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

/// Metadata keys surfaced as extras on ticket-resolution hits.
pub const TICKET_EXTRA_KEYS: [&str; 3] = ["module", "priority", "root_cause"];

/// Abstract, concurrently readable document index.
///
/// # Operations
///
/// | Method | Ordering | `score` |
/// |--------|----------|---------|
/// | [`semantic_query`](DocumentIndex::semantic_query) | cosine similarity, descending | `1 - cosine_distance` |
/// | [`lexical_query`](DocumentIndex::lexical_query) | lexical relevance, descending | backend relevance |
///
/// Both return hits ranked `1..=n` in result order, each tagged with the
/// queried pool.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Nearest documents in `pool` to `embedding`.
    async fn semantic_query(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Documents in `pool` ranked by lexical relevance to `text`.
    async fn lexical_query(&self, pool: Pool, text: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Extract distinct `<UPPER_CASE>` placeholder tokens in first-seen order.
///
/// ```rust
/// use research_harness_core::store::extract_placeholders;
///
/// let t = "UPDATE t SET x = <VALUE> WHERE id = <PROPERTY_ID> AND y = <VALUE>";
/// assert_eq!(extract_placeholders(t), vec!["<VALUE>", "<PROPERTY_ID>"]);
/// ```
pub fn extract_placeholders(text: &str) -> Vec<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"<[A-Z_]+>").expect("static regex"));
    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
    }
    found
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Build an unranked hit from a stored document.
///
/// Attaches the pool-specific extras: placeholders for scripts, and
/// `module` / `priority` / `root_cause` for ticket resolutions.
pub fn hit_from_document(doc: &Document, score: f64, preview_chars: usize) -> SearchHit {
    let placeholders = match doc.pool {
        Pool::Script => extract_placeholders(&doc.body),
        _ => Vec::new(),
    };
    let extras: Map<String, Value> = match doc.pool {
        Pool::TicketResolution => TICKET_EXTRA_KEYS
            .iter()
            .filter_map(|k| {
                doc.metadata
                    .get(*k)
                    .filter(|v| !v.is_null())
                    .map(|v| (k.to_string(), v.clone()))
            })
            .collect(),
        _ => Map::new(),
    };
    SearchHit {
        rank: 0,
        pool: doc.pool,
        source_id: doc.id.clone(),
        title: doc.title.clone(),
        content_preview: preview(&doc.body, preview_chars),
        score,
        category: doc.category.clone(),
        placeholders,
        extras,
    }
}
