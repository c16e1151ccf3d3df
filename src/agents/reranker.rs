//! Best-effort reordering of the top candidates by relevance.
//!
//! Only the first `candidate_count` hits are shown to the provider; the
//! tail keeps its order behind them. Whatever the provider answers, the
//! output holds exactly the input hits: unknown ids are ignored, repeated
//! ids count once, omitted ids are appended in their original order.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::models::{assign_ranks, SearchHit};
use research_harness_core::outcome::Outcome;
use research_harness_core::store::preview;

use super::{Agent, CandidateSet};

pub const SYSTEM_PROMPT: &str = "\
You rank support search results. Given a question and candidate results, return the
candidate IDs ordered from most to least relevant.
Respond ONLY with a JSON array of IDs, e.g. [\"KB-123\", \"SCRIPT-45\"].";

const MAX_OUTPUT: u32 = 500;
const TITLE_CHARS: usize = 120;
const PREVIEW_CHARS: usize = 200;

pub struct Reranker {
    provider: Arc<dyn GenerationProvider>,
    candidate_count: usize,
}

impl Reranker {
    pub fn new(provider: Arc<dyn GenerationProvider>, candidate_count: usize) -> Self {
        Self {
            provider,
            candidate_count: candidate_count.max(1),
        }
    }
}

fn user_prompt(question: &str, head: &[SearchHit]) -> String {
    let lines: Vec<String> = head
        .iter()
        .map(|c| {
            format!(
                "[{}] {} - {}",
                c.source_id,
                preview(&c.title, TITLE_CHARS),
                preview(&c.content_preview, PREVIEW_CHARS)
            )
        })
        .collect();
    format!(
        "Question: {}\n\nCandidates:\n{}",
        question,
        lines.join("\n")
    )
}

/// Reorder the first `head` candidates by `ranked_ids` and re-rank the
/// whole list `1..=n`.
pub fn apply_order(candidates: Vec<SearchHit>, head: usize, ranked_ids: &[Value]) -> Vec<SearchHit> {
    let mut slots: Vec<Option<SearchHit>> = candidates.into_iter().map(Some).collect();
    let head = head.min(slots.len());
    let mut ordered = Vec::with_capacity(slots.len());

    for id in ranked_ids.iter().filter_map(Value::as_str) {
        let found = slots[..head]
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|hit| hit.source_id == id));
        if let Some(slot) = found {
            ordered.extend(slot.take());
        }
    }
    // Omitted head candidates, then the untouched tail, in original order.
    ordered.extend(slots.into_iter().flatten());

    assign_ranks(&mut ordered);
    ordered
}

#[async_trait]
impl Agent for Reranker {
    type Input = CandidateSet;
    type Output = Vec<SearchHit>;

    fn stage(&self) -> &'static str {
        "rerank"
    }

    async fn run(&self, input: CandidateSet) -> Outcome<Vec<SearchHit>> {
        let CandidateSet {
            question,
            candidates,
        } = input;
        if candidates.is_empty() {
            return Outcome::Generated(candidates);
        }

        let head = self.candidate_count.min(candidates.len());
        let prompt = user_prompt(&question, &candidates[..head]);
        match complete_json::<Vec<Value>>(self.provider.as_ref(), SYSTEM_PROMPT, &prompt, MAX_OUTPUT)
            .await
        {
            Ok(ids) => Outcome::Generated(apply_order(candidates, head, &ids)),
            Err(error) => Outcome::Fallback {
                value: candidates,
                error,
            },
        }
    }
}
