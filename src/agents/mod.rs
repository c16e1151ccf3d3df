//! Pipeline stages and the pipelines that compose them.
//!
//! Each generative stage is an [`Agent`]: a typed input, a typed output,
//! and an [`Outcome`] that is either the validated generated value or the
//! stage's own fallback. Stages never return errors; the fallback policy
//! is part of the stage.
//!
//! # Stages
//!
//! | Agent | Input | Output | Fallback |
//! |-------|-------|--------|----------|
//! | [`Classifier`] | question | [`Classification`](research_harness_core::models::Classification) | KB, confidence 0.3 |
//! | [`ComplexityRouter`] | question | [`Complexity`](research_harness_core::models::Complexity) | `RESEARCH` |
//! | [`Decomposer`] | question | sub-queries | one KB sub-query with the question |
//! | [`Reranker`] | question + candidates | candidates | input order, unchanged |
//! | [`Synthesizer`] | question + candidates | [`ResearchReport`](research_harness_core::models::ResearchReport) | mechanical report from the top 10 |
//! | [`GapConfirmer`] | ticket + closest KB match | [`GapAssessment`](research_harness_core::models::GapAssessment) | `gap_detected = true` |
//! | [`KbDrafter`] | resolved ticket + context | [`KbDraft`] | problem/resolution article |
//!
//! # Flow
//!
//! ```text
//!              ┌──────────────────┐
//! question ──▶ │ ComplexityRouter │
//!              └───┬──────────┬───┘
//!           SIMPLE │          │ RESEARCH
//!                  ▼          ▼
//!          ┌────────────┐   ┌────────────┐ ┌────────────┐
//!          │ Classifier │   │ Classifier │ │ Decomposer │   (concurrent)
//!          └─────┬──────┘   └─────┬──────┘ └─────┬──────┘
//!                ▼                ▼              ▼
//!        hybrid search      fan-out: N sub-queries + baseline
//!     (primary + secondary)        │ merge by id (max score)
//!                │                 ▼
//!                ▼             Reranker ──▶ Synthesizer
//!            Reranker
//! ```

pub mod classifier;
pub mod decomposer;
pub mod gap;
pub mod kb_draft;
pub mod pipeline;
pub mod reranker;
pub mod research;
pub mod router;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;
use research_harness_core::outcome::Outcome;

pub use classifier::Classifier;
pub use decomposer::Decomposer;
pub use gap::{GapConfirmer, GapEvaluator, GapTicket};
pub use kb_draft::{DraftRequest, KbDraft, KbDrafter};
pub use pipeline::Pipeline;
pub use reranker::Reranker;
pub use router::ComplexityRouter;
pub use synthesizer::Synthesizer;

// ═══════════════════════════════════════════════════════════════════════
// Agent Trait
// ═══════════════════════════════════════════════════════════════════════

/// A pipeline stage backed by a generation provider.
///
/// `run` always yields a value: [`Outcome::Generated`] when the provider
/// answered and the answer validated, [`Outcome::Fallback`] otherwise.
#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stage name recorded in response metadata when this stage falls back.
    fn stage(&self) -> &'static str;

    async fn run(&self, input: Self::Input) -> Outcome<Self::Output>;
}

/// A question paired with the candidates a stage works over.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub question: String,
    pub candidates: Vec<research_harness_core::models::SearchHit>,
}
