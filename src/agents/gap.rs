//! Knowledge-gap evaluation for resolved tickets.
//!
//! [`GapEvaluator`] embeds `description + "\n" + resolution`, looks up the
//! single closest KB article (semantic only), and:
//!
//! - similarity ≥ threshold → no gap, decided locally; the generation
//!   provider is never called on this branch;
//! - otherwise → [`GapConfirmer`] asks the provider, falling back to
//!   `gap_detected = true` so knowledge is over-captured rather than lost.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use research_harness_core::embedding::EmbeddingProvider;
use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::models::{GapAssessment, Pool, SearchHit};
use research_harness_core::outcome::{Fallbacks, Outcome};
use research_harness_core::store::DocumentIndex;

use super::Agent;

pub const SYSTEM_PROMPT: &str = "\
You detect knowledge gaps. You get a resolved support ticket and the closest existing
knowledge base article. Decide whether the resolution holds new knowledge worth a new
article: is the scenario already covered, does the resolution differ substantially,
would an article help future agents, does it contain steps the article lacks?

Respond ONLY with JSON:
{\"gap_detected\": true, \"gap_description\": \"what knowledge is missing\", \"suggested_title\": \"title for a new article\"}";

const MAX_OUTPUT: u32 = 300;

/// Similarities are computed in f32; a match this close below the
/// threshold still counts as meeting it.
const SIMILARITY_TOLERANCE: f64 = 1e-6;

fn meets_threshold(similarity: f64, threshold: f64) -> bool {
    similarity + SIMILARITY_TOLERANCE >= threshold
}

/// A resolved ticket submitted for gap evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapTicket {
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl GapTicket {
    fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or("General")
    }

    fn embed_text(&self) -> String {
        format!("{}\n{}", self.description, self.resolution)
    }
}

// ============ Confirmation agent ============

/// Input of [`GapConfirmer`]: the ticket and its closest KB match, if any.
#[derive(Debug, Clone)]
pub struct GapConfirmation {
    pub ticket: GapTicket,
    pub best_match: Option<SearchHit>,
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
struct RawGap {
    gap_detected: bool,
    #[serde(default)]
    gap_description: Option<String>,
    #[serde(default)]
    suggested_title: Option<String>,
}

pub struct GapConfirmer {
    provider: Arc<dyn GenerationProvider>,
}

impl GapConfirmer {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Assessment used when confirmation fails: assume a gap.
    pub fn fallback(input: &GapConfirmation) -> GapAssessment {
        let category = input.ticket.category_label();
        GapAssessment {
            gap_detected: true,
            description: format!(
                "No existing KB match above {} threshold for {} issue; generation confirmation failed.",
                input.threshold, category
            ),
            suggested_title: Some(format!("Resolving {} Issues", category)),
            best_match_id: input.best_match.as_ref().map(|m| m.source_id.clone()),
            best_match_similarity: best_similarity(input.best_match.as_ref()),
        }
    }
}

fn best_similarity(best_match: Option<&SearchHit>) -> f64 {
    best_match.map(|m| m.score).unwrap_or(0.0)
}

fn user_prompt(input: &GapConfirmation) -> String {
    let closest = match &input.best_match {
        Some(m) => format!(
            "Title: {}\nPreview: {}\nSimilarity: {:.3}",
            m.title, m.content_preview, m.score
        ),
        None => "No matching KB article found.".to_string(),
    };
    format!(
        "Ticket Category: {}\n\nTicket Description:\n{}\n\nTicket Resolution:\n{}\n\nClosest Existing KB Article:\n{}",
        input.ticket.category_label(),
        input.ticket.description,
        input.ticket.resolution,
        closest
    )
}

#[async_trait]
impl Agent for GapConfirmer {
    type Input = GapConfirmation;
    type Output = GapAssessment;

    fn stage(&self) -> &'static str {
        "gap_confirmation"
    }

    async fn run(&self, input: GapConfirmation) -> Outcome<GapAssessment> {
        let result =
            complete_json::<RawGap>(self.provider.as_ref(), SYSTEM_PROMPT, &user_prompt(&input), MAX_OUTPUT)
                .await
                .map(|raw| GapAssessment {
                    gap_detected: raw.gap_detected,
                    description: raw.gap_description.unwrap_or_default(),
                    suggested_title: raw.suggested_title.filter(|t| !t.trim().is_empty()),
                    best_match_id: input.best_match.as_ref().map(|m| m.source_id.clone()),
                    best_match_similarity: best_similarity(input.best_match.as_ref()),
                });
        Outcome::from_result(result, || GapConfirmer::fallback(&input))
    }
}

// ============ Evaluator ============

/// Result of one gap evaluation, with the facts reported as metadata.
#[derive(Debug, Clone)]
pub struct GapEvaluation {
    pub assessment: GapAssessment,
    pub threshold: f64,
    /// `true` when the provider's answer decided the verdict.
    pub generation_confirmed: bool,
    pub fallbacks: Fallbacks,
}

pub struct GapEvaluator {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    confirmer: GapConfirmer,
    threshold: f64,
}

impl GapEvaluator {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        provider: Arc<dyn GenerationProvider>,
        threshold: f64,
    ) -> Self {
        Self {
            index,
            embedder,
            confirmer: GapConfirmer::new(provider),
            threshold,
        }
    }

    /// Closest KB article to the ticket text, or `None` (logged and
    /// flagged) when embedding or search fails.
    async fn best_kb_match(&self, ticket: &GapTicket, fallbacks: &mut Fallbacks) -> Option<SearchHit> {
        let embedding = match self.embedder.embed(&ticket.embed_text()).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "gap embedding failed");
                fallbacks.push("embedding");
                return None;
            }
        };
        match self.index.semantic_query(Pool::Kb, &embedding, 1).await {
            Ok(hits) => hits.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "gap KB lookup failed");
                fallbacks.push("search");
                None
            }
        }
    }

    pub async fn evaluate(&self, ticket: GapTicket) -> GapEvaluation {
        let mut fallbacks = Fallbacks::new();
        let best_match = self.best_kb_match(&ticket, &mut fallbacks).await;

        if let Some(m) = best_match.as_ref().filter(|m| meets_threshold(m.score, self.threshold)) {
            tracing::debug!(best_match = %m.source_id, similarity = m.score, "existing KB covers ticket");
            return GapEvaluation {
                assessment: GapAssessment {
                    gap_detected: false,
                    description: format!(
                        "Existing KB article '{}' (similarity: {:.3}) covers this scenario.",
                        m.title, m.score
                    ),
                    suggested_title: None,
                    best_match_id: Some(m.source_id.clone()),
                    best_match_similarity: m.score,
                },
                threshold: self.threshold,
                generation_confirmed: false,
                fallbacks,
            };
        }

        let outcome = self
            .confirmer
            .run(GapConfirmation {
                ticket,
                best_match,
                threshold: self.threshold,
            })
            .await;
        fallbacks.note(self.confirmer.stage(), &outcome);
        let generation_confirmed = !outcome.is_fallback();

        GapEvaluation {
            assessment: outcome.into_value(),
            threshold: self.threshold,
            generation_confirmed,
            fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{ConstEmbedder, Scripted};
    use research_harness_core::embedding::cosine_similarity;
    use research_harness_core::models::Document;
    use research_harness_core::store::memory::InMemoryIndex;
    use serde_json::Map;

    fn ticket() -> GapTicket {
        GapTicket {
            ticket_id: Some("CS-1".into()),
            description: "Move-in blocked".into(),
            resolution: "Reset the certification".into(),
            category: Some("Compliance".into()),
        }
    }

    fn index_with_kb(vector: Vec<f32>) -> Arc<InMemoryIndex> {
        let index = InMemoryIndex::new();
        index
            .insert(
                Document {
                    id: "KB-7".into(),
                    pool: Pool::Kb,
                    title: "Certification reset".into(),
                    body: "Steps to reset a certification".into(),
                    category: None,
                    metadata: Map::new(),
                },
                Some(vector),
            )
            .unwrap();
        Arc::new(index)
    }

    fn evaluator(index: Arc<InMemoryIndex>, provider: Arc<Scripted>, threshold: f64) -> GapEvaluator {
        GapEvaluator::new(index, Arc::new(ConstEmbedder(vec![1.0, 0.0])), provider, threshold)
    }

    #[tokio::test]
    async fn test_above_threshold_never_calls_provider() {
        let provider = Scripted::always(r#"{"gap_detected": true}"#);
        let eval = evaluator(index_with_kb(vec![1.0, 0.0]), provider.clone(), 0.85)
            .evaluate(ticket())
            .await;
        assert!(!eval.assessment.gap_detected);
        assert_eq!(eval.assessment.best_match_id.as_deref(), Some("KB-7"));
        assert!(eval.assessment.suggested_title.is_none());
        assert_eq!(
            eval.assessment.description,
            "Existing KB article 'Certification reset' (similarity: 1.000) covers this scenario."
        );
        assert!(!eval.generation_confirmed);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_exactly_threshold_is_no_gap() {
        let kb = vec![0.85, 0.5];
        let similarity = cosine_similarity(&[1.0, 0.0], &kb) as f64;
        let provider = Scripted::always(r#"{"gap_detected": true}"#);
        let eval = evaluator(index_with_kb(kb), provider.clone(), similarity)
            .evaluate(ticket())
            .await;
        assert!(!eval.assessment.gap_detected);
        assert_eq!(eval.assessment.best_match_similarity, similarity);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_default_threshold_boundary_is_no_gap() {
        // cos = 0.85 against the query [1, 0], rounded through f32.
        let kb = vec![0.85, (1.0f32 - 0.85 * 0.85).sqrt()];
        let provider = Scripted::always(r#"{"gap_detected": true}"#);
        let eval = evaluator(index_with_kb(kb), provider.clone(), 0.85)
            .evaluate(ticket())
            .await;
        assert!(!eval.assessment.gap_detected);
        assert!((eval.assessment.best_match_similarity - 0.85).abs() < 1e-6);
        assert!(!eval.generation_confirmed);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_meets_threshold_tolerates_f32_rounding() {
        assert!(meets_threshold(0.85f32 as f64, 0.85));
        assert!(meets_threshold(0.849_999_9, 0.85));
        assert!(!meets_threshold(0.849, 0.85));
    }

    #[tokio::test]
    async fn test_below_threshold_asks_provider() {
        let provider = Scripted::always(
            r#"{"gap_detected": false, "gap_description": "covered enough", "suggested_title": ""}"#,
        );
        let eval = evaluator(index_with_kb(vec![0.0, 1.0]), provider.clone(), 0.85)
            .evaluate(ticket())
            .await;
        assert_eq!(provider.calls(), 1);
        assert!(eval.generation_confirmed);
        assert!(!eval.assessment.gap_detected);
        assert_eq!(eval.assessment.description, "covered enough");
        assert!(eval.assessment.suggested_title.is_none());
        assert_eq!(eval.assessment.best_match_id.as_deref(), Some("KB-7"));
        let (user, max) = provider.last_user().unwrap();
        assert_eq!(max, 300);
        assert!(user.contains("Ticket Category: Compliance"));
        assert!(user.contains("Title: Certification reset"));
    }

    #[tokio::test]
    async fn test_provider_failure_assumes_gap() {
        let eval = evaluator(index_with_kb(vec![0.0, 1.0]), Scripted::failing(), 0.85)
            .evaluate(ticket())
            .await;
        assert!(eval.assessment.gap_detected);
        assert!(!eval.generation_confirmed);
        assert!(eval.fallbacks.contains("gap_confirmation"));
        assert_eq!(
            eval.assessment.description,
            "No existing KB match above 0.85 threshold for Compliance issue; generation confirmation failed."
        );
        assert_eq!(
            eval.assessment.suggested_title.as_deref(),
            Some("Resolving Compliance Issues")
        );
    }

    #[tokio::test]
    async fn test_missing_gap_flag_is_failure() {
        let eval = evaluator(
            index_with_kb(vec![0.0, 1.0]),
            Scripted::always(r#"{"gap_description": "x"}"#),
            0.85,
        )
        .evaluate(ticket())
        .await;
        assert!(eval.assessment.gap_detected);
        assert!(!eval.generation_confirmed);
    }

    #[tokio::test]
    async fn test_empty_kb_asks_provider_without_match() {
        let provider = Scripted::always(r#"{"gap_detected": true, "suggested_title": "New"}"#);
        let eval = evaluator(Arc::new(InMemoryIndex::new()), provider.clone(), 0.85)
            .evaluate(ticket())
            .await;
        assert_eq!(provider.calls(), 1);
        assert!(eval.assessment.best_match_id.is_none());
        assert_eq!(eval.assessment.best_match_similarity, 0.0);
        assert!(provider
            .last_user()
            .unwrap()
            .0
            .contains("No matching KB article found."));
    }
}
