//! In-memory [`DocumentIndex`] implementation for testing and embedding.
//!
//! Documents and vectors live in a `Vec` behind `std::sync::RwLock`.
//! Semantic search is brute-force cosine similarity; lexical search
//! scores each document by how many distinct query terms it contains.
//! Both sorts are stable, so equal scores keep insertion order.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{assign_ranks, Document, Pool, SearchHit};

use super::{hit_from_document, DocumentIndex, DEFAULT_PREVIEW_CHARS};

struct StoredDocument {
    doc: Document,
    vector: Option<Vec<f32>>,
    /// Lowercased `title + body`, precomputed for lexical matching.
    haystack: String,
}

/// In-memory index for tests and small, static corpora.
pub struct InMemoryIndex {
    docs: RwLock<Vec<StoredDocument>>,
    preview_chars: usize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::with_preview_chars(DEFAULT_PREVIEW_CHARS)
    }

    pub fn with_preview_chars(preview_chars: usize) -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            preview_chars,
        }
    }

    /// Insert or replace a document (matched by id).
    pub fn insert(&self, doc: Document, vector: Option<Vec<f32>>) -> Result<()> {
        let haystack = format!("{}\n{}", doc.title, doc.body).to_lowercase();
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let stored = StoredDocument {
            doc,
            vector,
            haystack,
        };
        match docs.iter_mut().find(|s| s.doc.id == stored.doc.id) {
            Some(existing) => *existing = stored,
            None => docs.push(stored),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased alphanumeric query terms, deduplicated, at least 2 chars.
fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
    {
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn rank_desc(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    assign_ranks(&mut hits);
    hits
}

#[async_trait]
impl DocumentIndex for InMemoryIndex {
    async fn semantic_query(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let hits: Vec<SearchHit> = docs
            .iter()
            .filter(|s| s.doc.pool == pool)
            .filter_map(|s| {
                let v = s.vector.as_ref()?;
                let sim = cosine_similarity(embedding, v) as f64;
                Some(hit_from_document(&s.doc, sim, self.preview_chars))
            })
            .collect();
        Ok(rank_desc(hits, limit))
    }

    async fn lexical_query(&self, pool: Pool, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let hits: Vec<SearchHit> = docs
            .iter()
            .filter(|s| s.doc.pool == pool)
            .filter_map(|s| {
                let matches = terms.iter().filter(|t| s.haystack.contains(t.as_str())).count();
                (matches > 0)
                    .then(|| hit_from_document(&s.doc, matches as f64, self.preview_chars))
            })
            .collect();
        Ok(rank_desc(hits, limit))
    }
}
