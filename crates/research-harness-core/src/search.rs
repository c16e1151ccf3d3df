//! Hybrid search engine: semantic + lexical retrieval fused with weighted
//! Reciprocal Rank Fusion.
//!
//! The engine operates entirely through the [`DocumentIndex`] trait. The
//! caller embeds the query and passes the vector in; the raw query text,
//! when present, drives the lexical half.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `overfetch` semantic candidates from the pool (cosine similarity).
//! 2. If query text is given, fetch `overfetch` lexical candidates.
//! 3. Fuse: `score = w_sem / (K + rank_sem) + w_lex / (K + rank_lex)`,
//!    where a list that does not contain the document contributes 0.
//! 4. Sort by fused score (desc); ties keep first-seen candidate order
//!    (semantic list first, then lexical).
//! 5. Truncate to `limit` and rank `1..=n`.
//!
//! [`HybridSearch::search_with_secondary`] adds the secondary-pool
//! supplement used by the simple path and the research baseline.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use futures::future;

use crate::models::{assign_ranks, Pool, SearchHit};
use crate::store::DocumentIndex;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridParams {
    /// Candidates fetched from each of the semantic and lexical queries.
    pub overfetch: usize,
    /// Weight of the semantic list in fusion.
    pub semantic_weight: f64,
    /// Weight of the lexical list in fusion.
    pub lexical_weight: f64,
    /// RRF smoothing constant `K`.
    pub rrf_k: f64,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            overfetch: 20,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
            rrf_k: 60.0,
        }
    }
}

impl HybridParams {
    /// RRF contribution of a 1-based `rank` in a list weighted `weight`.
    pub fn rrf_term(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.rrf_k + rank as f64)
    }
}

/// Fuse a semantic and a lexical ranking with weighted RRF.
///
/// List position (not the incoming `rank` field) defines rank. A document
/// repeated within one list only counts at its first position. The
/// returned hits carry the fused score, keep the semantic hit's fields
/// when a document appears in both lists, and are not yet truncated or
/// ranked.
pub fn rrf_fuse(semantic: &[SearchHit], lexical: &[SearchHit], params: &HybridParams) -> Vec<SearchHit> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<(SearchHit, f64)> = Vec::new();

    for (list, weight) in [
        (semantic, params.semantic_weight),
        (lexical, params.lexical_weight),
    ] {
        let mut seen_in_list: HashSet<&str> = HashSet::new();
        for (pos, hit) in list.iter().enumerate() {
            if !seen_in_list.insert(hit.source_id.as_str()) {
                continue;
            }
            let term = params.rrf_term(weight, pos + 1);
            match slots.get(&hit.source_id) {
                Some(&slot) => fused[slot].1 += term,
                None => {
                    slots.insert(hit.source_id.clone(), fused.len());
                    fused.push((hit.clone(), term));
                }
            }
        }
    }

    // Stable sort: equal scores keep candidate (first-seen) order.
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));

    fused
        .into_iter()
        .map(|(mut hit, score)| {
            hit.score = score;
            hit
        })
        .collect()
}

/// Hybrid search over one [`DocumentIndex`].
pub struct HybridSearch<'a> {
    index: &'a dyn DocumentIndex,
    params: HybridParams,
}

impl<'a> HybridSearch<'a> {
    pub fn new(index: &'a dyn DocumentIndex, params: HybridParams) -> Self {
        Self { index, params }
    }

    pub fn params(&self) -> &HybridParams {
        &self.params
    }

    /// Search one pool. Returns at most `limit` hits ranked `1..=n`.
    ///
    /// The lexical half is skipped when `raw_query` is `None` or blank.
    pub async fn search(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
        raw_query: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let overfetch = self.params.overfetch;
        let lexical_text = raw_query.map(str::trim).filter(|q| !q.is_empty());

        let semantic_fut = self.index.semantic_query(pool, embedding, overfetch);
        let lexical_fut = async {
            match lexical_text {
                Some(text) => self.index.lexical_query(pool, text, overfetch).await,
                None => Ok(Vec::new()),
            }
        };
        let (semantic, lexical) = future::try_join(semantic_fut, lexical_fut).await?;

        tracing::debug!(
            pool = %pool,
            semantic = semantic.len(),
            lexical = lexical.len(),
            "hybrid candidates fetched"
        );

        let mut fused = rrf_fuse(&semantic, &lexical, &self.params);
        fused.truncate(limit);
        assign_ranks(&mut fused);
        Ok(fused)
    }

    /// Search `primary` with `limit`, plus its secondary pool with
    /// `secondary_limit`, and concatenate.
    ///
    /// Secondary ranks continue from the primary count. Each hit keeps the
    /// pool it came from. A failed primary search is an error; a failed
    /// secondary search leaves the primary hits and is reported in
    /// [`Supplemented::secondary_error`].
    pub async fn search_with_secondary(
        &self,
        primary: Pool,
        embedding: &[f32],
        limit: usize,
        secondary_limit: usize,
        raw_query: Option<&str>,
    ) -> Result<Supplemented> {
        let secondary = primary.secondary();
        let (primary_hits, secondary_hits) = future::join(
            self.search(primary, embedding, limit, raw_query),
            self.search(secondary, embedding, secondary_limit, raw_query),
        )
        .await;
        let mut hits = primary_hits?;
        let secondary_error = match secondary_hits {
            Ok(extra) => {
                hits.extend(extra);
                assign_ranks(&mut hits);
                None
            }
            Err(e) => {
                tracing::warn!(
                    pool = %secondary,
                    error = %format!("{:#}", e),
                    "secondary search failed; keeping primary results"
                );
                Some(e)
            }
        };
        Ok(Supplemented {
            hits,
            secondary_error,
        })
    }
}

/// Primary hits plus the secondary supplement, when it succeeded.
#[derive(Debug)]
pub struct Supplemented {
    pub hits: Vec<SearchHit>,
    pub secondary_error: Option<anyhow::Error>,
}
