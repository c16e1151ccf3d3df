//! Decomposition of a complex question into targeted sub-queries.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::models::{Pool, SubQuery};
use research_harness_core::outcome::{Outcome, StageError};

use super::Agent;

pub const SYSTEM_PROMPT: &str = "\
You break complex support questions into 2-4 focused search sub-queries that together
cover the whole question. Each sub-query targets one pool:
- KB: how-to guides, workflows, configuration
- SCRIPT: SQL data-fix scripts
- TICKET_RESOLUTION: resolutions of past tickets

Respond ONLY with a JSON array:
[{\"query\": \"concise search query\", \"pool\": \"KB|SCRIPT|TICKET_RESOLUTION\", \"aspect\": \"what this sub-query investigates\"}]";

const MAX_OUTPUT: u32 = 500;

#[derive(Debug, Deserialize)]
struct RawSubQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    aspect: Option<String>,
}

pub struct Decomposer {
    provider: Arc<dyn GenerationProvider>,
    max_sub_queries: usize,
}

impl Decomposer {
    pub fn new(provider: Arc<dyn GenerationProvider>, max_sub_queries: usize) -> Self {
        Self {
            provider,
            max_sub_queries: max_sub_queries.max(1),
        }
    }

    /// The single sub-query used when decomposition fails.
    pub fn fallback(question: &str) -> Vec<SubQuery> {
        vec![SubQuery {
            query: question.to_string(),
            pool: Pool::Kb,
            aspect: "general search".to_string(),
        }]
    }

    fn validate(&self, raw: Vec<RawSubQuery>, question: &str) -> Result<Vec<SubQuery>, StageError> {
        if raw.is_empty() {
            return Err(StageError::schema("decomposition returned no sub-queries"));
        }
        Ok(raw
            .into_iter()
            .take(self.max_sub_queries)
            .map(|item| SubQuery {
                query: item
                    .query
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .unwrap_or_else(|| question.to_string()),
                pool: item.pool.as_deref().and_then(Pool::parse).unwrap_or(Pool::Kb),
                aspect: item.aspect.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl Agent for Decomposer {
    type Input = String;
    type Output = Vec<SubQuery>;

    fn stage(&self) -> &'static str {
        "decomposition"
    }

    async fn run(&self, question: String) -> Outcome<Vec<SubQuery>> {
        let result =
            complete_json::<Vec<RawSubQuery>>(self.provider.as_ref(), SYSTEM_PROMPT, &question, MAX_OUTPUT)
                .await
                .and_then(|raw| self.validate(raw, &question));
        Outcome::from_result(result, || Decomposer::fallback(&question))
    }
}
