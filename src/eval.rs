//! Retrieval evaluation against ground-truth questions.
//!
//! Each line of the input is an [`EvalCase`]. Cases run through the simple
//! path, at most [`CONCURRENCY`] at a time, and are scored on pool
//! classification and on where the first expected document lands in the
//! result list.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use research_harness_core::models::{Pool, SearchHit};

use crate::agents::Pipeline;
use crate::config::Config;

/// Requests in flight at once.
pub const CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub expected_pool: Pool,
    #[serde(default)]
    pub expected_ids: Vec<String>,
}

/// Score of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseScore {
    pub expected_pool: Pool,
    pub pool_correct: bool,
    /// 1-based position of the first expected id in the results.
    pub first_hit: Option<usize>,
}

impl CaseScore {
    fn hit_at(&self, k: usize) -> bool {
        self.first_hit.is_some_and(|pos| pos <= k)
    }
}

pub fn score_case(case: &EvalCase, predicted_pool: Option<Pool>, results: &[SearchHit]) -> CaseScore {
    CaseScore {
        expected_pool: case.expected_pool,
        pool_correct: predicted_pool == Some(case.expected_pool),
        first_hit: results
            .iter()
            .position(|hit| case.expected_ids.iter().any(|id| *id == hit.source_id))
            .map(|i| i + 1),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub count: usize,
    pub hit_at_1: f64,
    pub hit_at_3: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub total: usize,
    pub classification_accuracy: f64,
    pub hit_at_1: f64,
    pub hit_at_3: f64,
    pub hit_at_5: f64,
    pub per_pool: BTreeMap<String, PoolStats>,
}

fn rate(scores: &[&CaseScore], pred: impl Fn(&CaseScore) -> bool) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let n = scores.iter().filter(|s| pred(s)).count();
    (n as f64 / scores.len() as f64 * 1000.0).round() / 1000.0
}

pub fn summarize(scores: &[CaseScore]) -> EvalReport {
    let all: Vec<&CaseScore> = scores.iter().collect();
    let mut per_pool = BTreeMap::new();
    for pool in Pool::ALL {
        let in_pool: Vec<&CaseScore> = scores.iter().filter(|s| s.expected_pool == pool).collect();
        if in_pool.is_empty() {
            continue;
        }
        per_pool.insert(
            pool.to_string(),
            PoolStats {
                count: in_pool.len(),
                hit_at_1: rate(&in_pool, |s| s.hit_at(1)),
                hit_at_3: rate(&in_pool, |s| s.hit_at(3)),
            },
        );
    }
    EvalReport {
        total: scores.len(),
        classification_accuracy: rate(&all, |s| s.pool_correct),
        hit_at_1: rate(&all, |s| s.hit_at(1)),
        hit_at_3: rate(&all, |s| s.hit_at(3)),
        hit_at_5: rate(&all, |s| s.hit_at(5)),
        per_pool,
    }
}

pub fn parse_cases(content: &str) -> Result<Vec<EvalCase>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid eval case on line {}", i + 1))
        })
        .collect()
}

/// Run `cases` through the simple path and score them.
pub async fn evaluate(pipeline: &Pipeline, cases: &[EvalCase]) -> Vec<CaseScore> {
    stream::iter(cases)
        .map(|case| async move {
            match pipeline.ask(&case.question).await {
                Ok(response) => score_case(
                    case,
                    Some(response.classification.pool),
                    &response.results,
                ),
                Err(e) => {
                    tracing::warn!(question = %case.question, error = %e, "eval case rejected");
                    score_case(case, None, &[])
                }
            }
        })
        .buffered(CONCURRENCY)
        .collect()
        .await
}

/// `rh eval <path> [--limit N]`.
pub async fn run_eval(config: &Config, path: &Path, limit: Option<usize>) -> Result<EvalReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read eval cases: {}", path.display()))?;
    let mut cases = parse_cases(&content)?;
    if let Some(limit) = limit {
        cases.truncate(limit);
    }

    let pipeline = Pipeline::from_config(config).await?;
    tracing::info!(cases = cases.len(), "running retrieval eval");
    let scores = evaluate(&pipeline, &cases).await;
    Ok(summarize(&scores))
}
