//! Complexity routing: SIMPLE lookup or multi-step RESEARCH.
//!
//! Any failure routes to RESEARCH, the more thorough path. Pool
//! classification fails the other way (toward a plain KB search).

use async_trait::async_trait;
use std::sync::Arc;

use research_harness_core::generation::{complete_text, GenerationProvider};
use research_harness_core::models::Complexity;
use research_harness_core::outcome::{Outcome, StageError};

use super::Agent;

pub const SYSTEM_PROMPT: &str = "\
You route support questions by complexity.
SIMPLE: a direct lookup, a single topic, a \"how do I\" question, a request for a specific script.
RESEARCH: spans several topics, needs cross-referencing or a synthesized answer, asks for a
comparison, a root-cause analysis across systems, or a comprehensive overview.
Answer with exactly one word: SIMPLE or RESEARCH";

const MAX_OUTPUT: u32 = 10;

pub struct ComplexityRouter {
    provider: Arc<dyn GenerationProvider>,
}

impl ComplexityRouter {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }
}

fn parse_route(answer: &str) -> Result<Complexity, StageError> {
    match answer.trim().to_ascii_uppercase().as_str() {
        "SIMPLE" => Ok(Complexity::Simple),
        "RESEARCH" => Ok(Complexity::Research),
        other => Err(StageError::schema(format!(
            "expected SIMPLE or RESEARCH, got {:?}",
            other
        ))),
    }
}

#[async_trait]
impl Agent for ComplexityRouter {
    type Input = String;
    type Output = Complexity;

    fn stage(&self) -> &'static str {
        "routing"
    }

    async fn run(&self, question: String) -> Outcome<Complexity> {
        let result = complete_text(self.provider.as_ref(), SYSTEM_PROMPT, &question, MAX_OUTPUT)
            .await
            .and_then(|answer| parse_route(&answer));
        Outcome::from_result(result, || Complexity::Research)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::Scripted;

    async fn route(answer: &str) -> Outcome<Complexity> {
        ComplexityRouter::new(Scripted::always(answer))
            .run("question".into())
            .await
    }

    #[tokio::test]
    async fn test_exact_answers() {
        assert_eq!(route("SIMPLE").await.into_value(), Complexity::Simple);
        assert_eq!(route(" research\n").await.into_value(), Complexity::Research);
        assert!(!route("simple").await.is_fallback());
    }

    #[tokio::test]
    async fn test_unexpected_answer_routes_to_research() {
        let outcome = route("SIMPLE, probably").await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), Complexity::Research);
    }

    #[tokio::test]
    async fn test_failure_routes_to_research() {
        let outcome = ComplexityRouter::new(Scripted::failing())
            .run("q".into())
            .await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), Complexity::Research);

        let empty = route("   ").await;
        assert!(matches!(empty.error(), Some(StageError::EmptyResponse)));
        assert_eq!(empty.into_value(), Complexity::Research);
    }
}
