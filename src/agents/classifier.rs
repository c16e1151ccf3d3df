//! Intent classification: which pool answers a question, plus a
//! search-optimized rewrite.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::models::{Classification, Pool};
use research_harness_core::outcome::Outcome;

use super::Agent;

pub const SYSTEM_PROMPT: &str = "\
You classify customer support questions for a property-management software support desk.
Decide which kind of resource best answers the question and rewrite it as a search query.

Pools:
- SCRIPT: a backend data problem that needs a SQL remediation script (sync errors, invalid
  references, data inconsistencies, Tier 3 data fixes).
- KB: a how-to, workflow, configuration or best-practice question.
- TICKET_RESOLUTION: asks how a specific past issue was resolved, or for precedent from
  similar cases.

For search_query: drop filler and pleasantries, keep product, module and error names,
expand acronyms, aim for 8-15 keywords.

Respond ONLY with JSON:
{\"answer_type\": \"SCRIPT|KB|TICKET_RESOLUTION\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\", \"search_query\": \"...\"}";

const MAX_OUTPUT: u32 = 300;

/// Confidence assigned when the pool had to be coerced to KB.
pub const COERCED_CONFIDENCE: f64 = 0.5;
/// Confidence of the fallback classification.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Pool and confidence stay untyped so a wrongly typed value is coerced
/// instead of rejecting the whole answer.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    answer_type: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    search_query: Option<String>,
}

pub struct Classifier {
    provider: Arc<dyn GenerationProvider>,
}

impl Classifier {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Classification used when the provider fails or answers garbage.
    pub fn fallback(question: &str) -> Classification {
        Classification {
            pool: Pool::Kb,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: "classification failed".to_string(),
            rewritten_query: question.to_string(),
        }
    }
}

fn parse_pool(value: Option<&Value>) -> Option<Pool> {
    value.and_then(Value::as_str).and_then(Pool::parse)
}

/// Numbers and numeric strings; anything else yields `None`.
fn parse_confidence(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
}

fn validate(raw: RawClassification, question: &str) -> Classification {
    let (pool, confidence) = match parse_pool(raw.answer_type.as_ref()) {
        Some(pool) => (
            pool,
            parse_confidence(raw.confidence.as_ref())
                .unwrap_or(COERCED_CONFIDENCE)
                .clamp(0.0, 1.0),
        ),
        None => (Pool::Kb, COERCED_CONFIDENCE),
    };
    let rewritten_query = raw
        .search_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| question.to_string());

    Classification {
        pool,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
        rewritten_query,
    }
}

#[async_trait]
impl Agent for Classifier {
    type Input = String;
    type Output = Classification;

    fn stage(&self) -> &'static str {
        "classification"
    }

    async fn run(&self, question: String) -> Outcome<Classification> {
        let result =
            complete_json::<RawClassification>(self.provider.as_ref(), SYSTEM_PROMPT, &question, MAX_OUTPUT)
                .await
                .map(|raw| validate(raw, &question));
        Outcome::from_result(result, || Classifier::fallback(&question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::Scripted;

    async fn classify(answer: &str) -> Outcome<Classification> {
        let provider = Scripted::always(answer);
        Classifier::new(provider).run("How do I fix a voucher?".into()).await
    }

    #[tokio::test]
    async fn test_valid_classification() {
        let outcome = classify(
            r#"{"answer_type": "SCRIPT", "confidence": 0.95, "reasoning": "data fix", "search_query": "voucher backend fix"}"#,
        )
        .await;
        assert!(!outcome.is_fallback());
        let c = outcome.into_value();
        assert_eq!(c.pool, Pool::Script);
        assert_eq!(c.confidence, 0.95);
        assert_eq!(c.rewritten_query, "voucher backend fix");
    }

    #[tokio::test]
    async fn test_invalid_pool_coerced_to_kb() {
        let c = classify(r#"{"answer_type": "FAQ", "confidence": 0.99, "reasoning": "r", "search_query": "q"}"#)
            .await
            .into_value();
        assert_eq!(c.pool, Pool::Kb);
        assert_eq!(c.confidence, COERCED_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_missing_pool_and_rewrite() {
        let c = classify(r#"{"confidence": 0.9}"#).await.into_value();
        assert_eq!(c.pool, Pool::Kb);
        assert_eq!(c.confidence, COERCED_CONFIDENCE);
        assert_eq!(c.rewritten_query, "How do I fix a voucher?");
    }

    #[tokio::test]
    async fn test_non_string_pool_coerced_to_kb() {
        let outcome = classify(r#"{"answer_type": 3, "confidence": 0.9, "reasoning": "r"}"#).await;
        assert!(!outcome.is_fallback());
        let c = outcome.into_value();
        assert_eq!(c.pool, Pool::Kb);
        assert_eq!(c.confidence, COERCED_CONFIDENCE);
        assert_eq!(c.reasoning, "r");
    }

    #[tokio::test]
    async fn test_confidence_as_string() {
        let c = classify(r#"{"answer_type": "SCRIPT", "confidence": "0.9"}"#)
            .await
            .into_value();
        assert_eq!(c.pool, Pool::Script);
        assert_eq!(c.confidence, 0.9);

        let c = classify(r#"{"answer_type": "SCRIPT", "confidence": "high"}"#)
            .await
            .into_value();
        assert_eq!(c.pool, Pool::Script);
        assert_eq!(c.confidence, COERCED_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_confidence_clamped() {
        let c = classify(r#"{"answer_type": "kb", "confidence": 7.0, "search_query": "  "}"#)
            .await
            .into_value();
        assert_eq!(c.pool, Pool::Kb);
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.rewritten_query, "How do I fix a voucher?");
    }

    #[tokio::test]
    async fn test_unparsable_falls_back() {
        let outcome = classify("I think this is a KB question").await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), Classifier::fallback("How do I fix a voucher?"));
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let outcome = Classifier::new(Scripted::failing())
            .run("q".into())
            .await;
        assert!(outcome.is_fallback());
        let c = outcome.into_value();
        assert_eq!(c.pool, Pool::Kb);
        assert_eq!(c.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(c.reasoning, "classification failed");
        assert_eq!(c.rewritten_query, "q");
    }

    #[tokio::test]
    async fn test_pool_always_valid() {
        for answer in [
            "",
            "null",
            "[]",
            r#"{"answer_type": 3}"#,
            r#"{"answer_type": "TICKET_RESOLUTION"}"#,
            "```json\n{\"answer_type\": \"SCRIPT\"}\n```",
        ] {
            let c = classify(answer).await.into_value();
            assert!(Pool::ALL.contains(&c.pool));
            assert!((0.0..=1.0).contains(&c.confidence));
        }
    }
}
