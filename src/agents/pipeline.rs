//! The simple and research pipelines, gap evaluation and KB drafting,
//! behind one
//! [`Pipeline`] value shared by the CLI and the HTTP server.
//!
//! Every entry point returns a structurally complete response. Degraded
//! stages are listed in `metadata.fallbacks`; the only errors are caller
//! contract violations ([`RequestError`]).

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use research_harness_core::embedding::EmbeddingProvider;
use research_harness_core::generation::GenerationProvider;
use research_harness_core::models::{
    assign_ranks, Classification, Complexity, GapAssessment, Pool, ResearchReport, SearchHit,
    SubQuery,
};
use research_harness_core::outcome::Fallbacks;
use research_harness_core::search::{HybridParams, HybridSearch, Supplemented};
use research_harness_core::store::DocumentIndex;

use super::gap::{GapEvaluator, GapTicket};
use super::kb_draft::{DraftRequest, KbDraft, KbDrafter};
use super::research::{merge_max, Branch, FanOut, FanOutLimits};
use super::{Agent, CandidateSet, Classifier, ComplexityRouter, Decomposer, Reranker, Synthesizer};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::generation::{create_generator, Tier};
use crate::migrate;
use crate::sqlite_index::SqliteIndex;

/// Caller contract violations; the only errors a pipeline raises.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("ticket description and resolution must not both be empty")]
    EmptyTicket,
}

/// Path a request took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Simple,
    Research,
}

/// Timing, routing and degradation facts attached to every response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub route: Route,
    pub total_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_pool: Option<Pool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_pool: Option<Pool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    pub result_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_query_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_count: Option<usize>,
    /// Labels of fan-out branches whose search failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_branches: Option<Vec<String>>,
    /// Distinct documents after merging, before any truncation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_result_count: Option<usize>,
    /// Candidates handed to synthesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_count: Option<usize>,
    pub fallbacks: Fallbacks,
}

impl ResponseMetadata {
    fn new(route: Route, fallbacks: Fallbacks) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            route,
            total_time_ms: 0.0,
            search_time_ms: None,
            primary_pool: None,
            secondary_pool: None,
            search_query: None,
            result_count: 0,
            sub_query_count: None,
            branch_count: None,
            failed_branches: None,
            merged_result_count: None,
            context_count: None,
            fallbacks,
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    (since.elapsed().as_secs_f64() * 10_000.0).round() / 10.0
}

/// Response of the simple path.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub classification: Classification,
    pub results: Vec<SearchHit>,
    pub metadata: ResponseMetadata,
}

/// Response of the research entry point, whichever route it took.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchResponse {
    pub mode: Route,
    pub classification: Classification,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ResearchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_queries: Option<Vec<SubQuery>>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapMetadata {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    pub threshold: f64,
    pub best_match_similarity: f64,
    pub generation_confirmed: bool,
    pub total_time_ms: f64,
    pub fallbacks: Fallbacks,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapResponse {
    #[serde(flatten)]
    pub assessment: GapAssessment,
    pub metadata: GapMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftMetadata {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// `false` when the deterministic fallback article was returned.
    pub generated: bool,
    pub total_time_ms: f64,
    pub fallbacks: Fallbacks,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftResponse {
    #[serde(flatten)]
    pub draft: KbDraft,
    pub metadata: DraftMetadata,
}

/// Result-size knobs, copied out of [`Config`].
#[derive(Debug, Clone)]
struct Limits {
    result_limit: usize,
    secondary_limit: usize,
    max_context_items: usize,
    display_results: usize,
}

pub struct Pipeline {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: HybridParams,
    limits: Limits,
    router: ComplexityRouter,
    classifier: Classifier,
    decomposer: Decomposer,
    reranker: Option<Reranker>,
    synthesizer: Synthesizer,
    fan_out: FanOut,
    gap: GapEvaluator,
    drafter: KbDrafter,
}

impl Pipeline {
    /// Assemble a pipeline over explicit collaborators.
    ///
    /// `fast` backs classification, routing, decomposition, reranking and
    /// gap confirmation; `synthesis` backs report synthesis and KB drafts.
    pub fn new(
        config: &Config,
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        fast: Arc<dyn GenerationProvider>,
        synthesis: Arc<dyn GenerationProvider>,
    ) -> Self {
        let params = config.retrieval.hybrid_params();
        let reranker = config
            .rerank
            .enabled
            .then(|| Reranker::new(fast.clone(), config.rerank.candidate_count));
        Self {
            fan_out: FanOut::new(
                index.clone(),
                params.clone(),
                FanOutLimits {
                    results_per_query: config.research.results_per_query,
                    baseline_limit: config.retrieval.result_limit,
                    secondary_limit: config.retrieval.secondary_limit,
                },
            ),
            gap: GapEvaluator::new(
                index.clone(),
                embedder.clone(),
                fast.clone(),
                config.gap.threshold,
            ),
            index,
            embedder,
            params,
            limits: Limits {
                result_limit: config.retrieval.result_limit,
                secondary_limit: config.retrieval.secondary_limit,
                max_context_items: config.research.max_context_items,
                display_results: config.research.display_results,
            },
            router: ComplexityRouter::new(fast.clone()),
            classifier: Classifier::new(fast.clone()),
            decomposer: Decomposer::new(fast, config.research.max_sub_queries),
            reranker,
            drafter: KbDrafter::new(synthesis.clone()),
            synthesizer: Synthesizer::new(synthesis),
        }
    }

    /// Open the SQLite index and create providers from `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index = SqliteIndex::open(config).await?;
        migrate::apply(index.pool()).await?;
        let embedder = create_provider(&config.embedding)?;
        let fast = create_generator(&config.generation, Tier::Fast)?;
        let synthesis = create_generator(&config.generation, Tier::Synthesis)?;
        Ok(Self::new(config, Arc::new(index), embedder, fast, synthesis))
    }

    // ============ Simple path ============

    /// Classify, hybrid-search the primary and secondary pools, rerank.
    pub async fn ask(&self, question: &str) -> Result<AskResponse, RequestError> {
        let question = non_empty(question)?;
        let started = Instant::now();
        Ok(self.simple(question, started, Fallbacks::new()).await)
    }

    async fn simple(&self, question: &str, started: Instant, mut fallbacks: Fallbacks) -> AskResponse {
        let outcome = self.classifier.run(question.to_string()).await;
        fallbacks.note(self.classifier.stage(), &outcome);
        let classification = outcome.into_value();

        let mut metadata = ResponseMetadata::new(Route::Simple, fallbacks);
        let search_started = Instant::now();
        let mut results = match self.simple_search(question, &classification).await {
            Ok(found) => {
                if found.secondary_error.is_some() {
                    metadata.fallbacks.push("secondary_search");
                }
                found.hits
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "simple search failed");
                metadata.fallbacks.push("search");
                Vec::new()
            }
        };
        metadata.search_time_ms = Some(elapsed_ms(search_started));

        if let Some(reranker) = &self.reranker {
            let outcome = reranker
                .run(CandidateSet {
                    question: question.to_string(),
                    candidates: results,
                })
                .await;
            metadata.fallbacks.note(reranker.stage(), &outcome);
            results = outcome.into_value();
        }

        metadata.primary_pool = Some(classification.pool);
        metadata.secondary_pool = Some(classification.pool.secondary());
        metadata.search_query = Some(classification.rewritten_query.clone());
        metadata.result_count = results.len();
        metadata.total_time_ms = elapsed_ms(started);
        tracing::info!(
            request_id = %metadata.request_id,
            pool = %classification.pool,
            results = results.len(),
            total_ms = metadata.total_time_ms,
            "simple path done"
        );

        AskResponse {
            classification,
            results,
            metadata,
        }
    }

    /// Embed the rewrite; the lexical half uses the original question.
    async fn simple_search(&self, question: &str, classification: &Classification) -> Result<Supplemented> {
        let embedding = self.embedder.embed(&classification.rewritten_query).await?;
        HybridSearch::new(self.index.as_ref(), self.params.clone())
            .search_with_secondary(
                classification.pool,
                &embedding,
                self.limits.result_limit,
                self.limits.secondary_limit,
                Some(question),
            )
            .await
    }

    // ============ Research path ============

    /// Route by complexity; SIMPLE questions take the simple path, the
    /// rest are decomposed, fanned out, merged, reranked and synthesized.
    pub async fn research(&self, question: &str) -> Result<ResearchResponse, RequestError> {
        let question = non_empty(question)?;
        let started = Instant::now();
        let mut fallbacks = Fallbacks::new();

        let route = self.router.run(question.to_string()).await;
        fallbacks.note(self.router.stage(), &route);

        match route.into_value() {
            Complexity::Simple => {
                let simple = self.simple(question, started, fallbacks).await;
                Ok(ResearchResponse {
                    mode: Route::Simple,
                    classification: simple.classification,
                    results: simple.results,
                    report: None,
                    sub_queries: None,
                    metadata: simple.metadata,
                })
            }
            Complexity::Research => Ok(self.deep(question, started, fallbacks).await),
        }
    }

    async fn deep(&self, question: &str, started: Instant, fallbacks: Fallbacks) -> ResearchResponse {
        let (classification, sub_queries) = tokio::join!(
            self.classifier.run(question.to_string()),
            self.decomposer.run(question.to_string())
        );
        let mut metadata = ResponseMetadata::new(Route::Research, fallbacks);
        metadata.fallbacks.note(self.classifier.stage(), &classification);
        metadata.fallbacks.note(self.decomposer.stage(), &sub_queries);
        let classification = classification.into_value();
        let sub_queries = sub_queries.into_value();

        let branches = Branch::plan(&sub_queries, classification.pool, &classification.rewritten_query);
        let texts: Vec<String> = branches.iter().map(|b| b.text().to_string()).collect();

        let search_started = Instant::now();
        let outcomes = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) if embeddings.len() == texts.len() => {
                self.fan_out.run(&branches, &embeddings).await
            }
            Ok(embeddings) => {
                tracing::warn!(
                    expected = texts.len(),
                    got = embeddings.len(),
                    "embedding batch size mismatch; skipping fan-out"
                );
                metadata.fallbacks.push("embedding");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "batched embedding failed; skipping fan-out");
                metadata.fallbacks.push("embedding");
                Vec::new()
            }
        };
        metadata.search_time_ms = Some(elapsed_ms(search_started));

        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(|o| o.label().to_string())
            .collect();
        let mut merged = merge_max(&outcomes);
        metadata.merged_result_count = Some(merged.len());

        if let Some(reranker) = &self.reranker {
            let outcome = reranker
                .run(CandidateSet {
                    question: question.to_string(),
                    candidates: merged,
                })
                .await;
            metadata.fallbacks.note(reranker.stage(), &outcome);
            merged = outcome.into_value();
        }
        assign_ranks(&mut merged);

        let context: Vec<SearchHit> = merged
            .iter()
            .take(self.limits.max_context_items)
            .cloned()
            .collect();
        merged.truncate(self.limits.display_results);
        let results = merged;

        metadata.context_count = Some(context.len());
        let report = self
            .synthesizer
            .run(CandidateSet {
                question: question.to_string(),
                candidates: context,
            })
            .await;
        metadata.fallbacks.note(self.synthesizer.stage(), &report);

        metadata.primary_pool = Some(classification.pool);
        metadata.secondary_pool = Some(classification.pool.secondary());
        metadata.search_query = Some(classification.rewritten_query.clone());
        metadata.sub_query_count = Some(sub_queries.len());
        metadata.branch_count = Some(branches.len());
        metadata.failed_branches = Some(failed);
        metadata.result_count = results.len();
        metadata.total_time_ms = elapsed_ms(started);
        tracing::info!(
            request_id = %metadata.request_id,
            sub_queries = sub_queries.len(),
            merged = metadata.merged_result_count.unwrap_or(0),
            total_ms = metadata.total_time_ms,
            "research path done"
        );

        ResearchResponse {
            mode: Route::Research,
            classification,
            results,
            report: Some(report.into_value()),
            sub_queries: Some(sub_queries),
            metadata,
        }
    }

    // ============ Gap evaluation ============

    pub async fn evaluate_gap(&self, ticket: GapTicket) -> Result<GapResponse, RequestError> {
        if ticket.description.trim().is_empty() && ticket.resolution.trim().is_empty() {
            return Err(RequestError::EmptyTicket);
        }
        let started = Instant::now();
        let ticket_id = ticket.ticket_id.clone();
        let evaluation = self.gap.evaluate(ticket).await;

        let metadata = GapMetadata {
            request_id: uuid::Uuid::new_v4().to_string(),
            ticket_id,
            threshold: evaluation.threshold,
            best_match_similarity: evaluation.assessment.best_match_similarity,
            generation_confirmed: evaluation.generation_confirmed,
            total_time_ms: elapsed_ms(started),
            fallbacks: evaluation.fallbacks,
        };
        tracing::info!(
            ticket_id = metadata.ticket_id.as_deref().unwrap_or("-"),
            gap = evaluation.assessment.gap_detected,
            similarity = metadata.best_match_similarity,
            "gap evaluated"
        );
        Ok(GapResponse {
            assessment: evaluation.assessment,
            metadata,
        })
    }

    // ============ KB drafting ============

    /// Draft a KB article for a resolved ticket; never fails once the
    /// ticket has text.
    pub async fn draft_kb(&self, request: DraftRequest) -> Result<DraftResponse, RequestError> {
        if request.description.trim().is_empty() && request.resolution.trim().is_empty() {
            return Err(RequestError::EmptyTicket);
        }
        let started = Instant::now();
        let ticket_id = request.ticket_id.clone();
        let outcome = self.drafter.run(request).await;
        let mut fallbacks = Fallbacks::new();
        fallbacks.note(self.drafter.stage(), &outcome);
        let generated = !outcome.is_fallback();

        let metadata = DraftMetadata {
            request_id: uuid::Uuid::new_v4().to_string(),
            ticket_id,
            generated,
            total_time_ms: elapsed_ms(started),
            fallbacks,
        };
        tracing::info!(
            ticket_id = metadata.ticket_id.as_deref().unwrap_or("-"),
            generated,
            "KB article drafted"
        );
        Ok(DraftResponse {
            draft: outcome.into_value(),
            metadata,
        })
    }
}

fn non_empty(question: &str) -> Result<&str, RequestError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        Err(RequestError::EmptyQuestion)
    } else {
        Ok(trimmed)
    }
}
