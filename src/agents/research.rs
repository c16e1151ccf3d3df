//! Fan-out orchestration for the research path.
//!
//! One search branch per sub-query plus one baseline branch run
//! concurrently against the hybrid search engine. The join keeps one
//! [`BranchOutcome`] per branch: a failed branch is logged and contributes
//! nothing, and never cancels or fails its siblings.
//!
//! Embeddings are computed by the caller in a single batch (sub-query
//! texts first, baseline last) and handed over positionally.

use futures::future;
use std::collections::HashMap;
use std::sync::Arc;

use research_harness_core::models::{Pool, SearchHit, SubQuery};
use research_harness_core::search::{HybridParams, HybridSearch};
use research_harness_core::store::DocumentIndex;

/// One concurrent search task.
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    /// Targeted search of one pool for a decomposed sub-query.
    SubQuery { index: usize, pool: Pool, text: String },
    /// Primary + secondary search with the classifier's rewrite.
    Baseline { pool: Pool, text: String },
}

impl Branch {
    /// Branches for `sub_queries`, followed by the baseline.
    pub fn plan(sub_queries: &[SubQuery], baseline_pool: Pool, baseline_text: &str) -> Vec<Branch> {
        let mut branches: Vec<Branch> = sub_queries
            .iter()
            .enumerate()
            .map(|(index, sq)| Branch::SubQuery {
                index,
                pool: sq.pool,
                text: sq.query.clone(),
            })
            .collect();
        branches.push(Branch::Baseline {
            pool: baseline_pool,
            text: baseline_text.to_string(),
        });
        branches
    }

    /// Text embedded (and lexically searched) for this branch.
    pub fn text(&self) -> &str {
        match self {
            Branch::SubQuery { text, .. } | Branch::Baseline { text, .. } => text,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Branch::SubQuery { index, pool, .. } => format!("sub_query[{}] {}", index, pool),
            Branch::Baseline { pool, .. } => format!("baseline {}", pool),
        }
    }
}

/// Result of one branch, success or failure, never both.
#[derive(Debug)]
pub enum BranchOutcome {
    Succeeded { label: String, hits: Vec<SearchHit> },
    Failed { label: String, error: anyhow::Error },
}

impl BranchOutcome {
    pub fn label(&self) -> &str {
        match self {
            BranchOutcome::Succeeded { label, .. } | BranchOutcome::Failed { label, .. } => label,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed { .. })
    }
}

/// Per-branch result limits.
#[derive(Debug, Clone)]
pub struct FanOutLimits {
    pub results_per_query: usize,
    pub baseline_limit: usize,
    pub secondary_limit: usize,
}

pub struct FanOut {
    index: Arc<dyn DocumentIndex>,
    params: HybridParams,
    limits: FanOutLimits,
}

impl FanOut {
    pub fn new(index: Arc<dyn DocumentIndex>, params: HybridParams, limits: FanOutLimits) -> Self {
        Self {
            index,
            params,
            limits,
        }
    }

    /// Run every branch concurrently; `embeddings[i]` belongs to `branches[i]`.
    ///
    /// Outcomes come back in branch order.
    pub async fn run(&self, branches: &[Branch], embeddings: &[Vec<f32>]) -> Vec<BranchOutcome> {
        let engine = HybridSearch::new(self.index.as_ref(), self.params.clone());
        let engine = &engine;

        let tasks = branches.iter().zip(embeddings).map(|(branch, embedding)| async move {
            let label = branch.label();
            let result = match branch {
                Branch::SubQuery { pool, text, .. } => {
                    engine
                        .search(*pool, embedding, self.limits.results_per_query, Some(text.as_str()))
                        .await
                }
                Branch::Baseline { pool, text } => {
                    engine
                        .search_with_secondary(
                            *pool,
                            embedding,
                            self.limits.baseline_limit,
                            self.limits.secondary_limit,
                            Some(text.as_str()),
                        )
                        .await
                        .map(|found| found.hits)
                }
            };
            match result {
                Ok(hits) => BranchOutcome::Succeeded { label, hits },
                Err(error) => {
                    tracing::warn!(branch = %label, error = %format!("{:#}", error), "search branch failed");
                    BranchOutcome::Failed { label, error }
                }
            }
        });

        future::join_all(tasks).await
    }
}

/// Merge successful branches by document id, keeping the maximum score.
///
/// The first hit seen for an id supplies its fields; a later hit replaces
/// it only with a strictly greater score. Output is sorted by score,
/// descending, with ties in first-seen order. Ranks are left to the caller.
pub fn merge_max(outcomes: &[BranchOutcome]) -> Vec<SearchHit> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut merged: Vec<SearchHit> = Vec::new();

    for outcome in outcomes {
        let BranchOutcome::Succeeded { hits, .. } = outcome else {
            continue;
        };
        for hit in hits {
            match slots.get(hit.source_id.as_str()) {
                Some(&slot) => {
                    if hit.score > merged[slot].score {
                        merged[slot] = hit.clone();
                    }
                }
                None => {
                    slots.insert(hit.source_id.as_str(), merged.len());
                    merged.push(hit.clone());
                }
            }
        }
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}
