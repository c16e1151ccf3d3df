//! Stage results with an explicit fallback arm.
//!
//! Every generative stage of the pipeline (classification, routing,
//! decomposition, reranking, synthesis, gap confirmation) returns an
//! [`Outcome`]. A stage never fails outright: when the generation provider
//! errors or its output does not parse, the stage builds its documented
//! fallback value and returns [`Outcome::Fallback`] carrying the cause.

use serde::Serialize;

/// Why a stage fell back.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("unparsable output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("no candidates to work with")]
    NoCandidates,
}

impl StageError {
    pub fn schema(reason: impl Into<String>) -> Self {
        StageError::Schema(reason.into())
    }
}

/// The value produced by a stage, tagged with how it was produced.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The provider answered and the answer validated.
    Generated(T),
    /// The stage's documented fallback value.
    Fallback { value: T, error: StageError },
}

impl<T> Outcome<T> {
    /// Resolve a stage result, building the fallback lazily on error.
    pub fn from_result(result: Result<T, StageError>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Outcome::Generated(value),
            Err(error) => Outcome::Fallback {
                value: fallback(),
                error,
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Generated(value) => value,
            Outcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Generated(value) => value,
            Outcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback { .. })
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Outcome::Generated(_) => None,
            Outcome::Fallback { error, .. } => Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Generated(value) => Outcome::Generated(f(value)),
            Outcome::Fallback { value, error } => Outcome::Fallback {
                value: f(value),
                error,
            },
        }
    }
}

/// Names of the stages that fell back during one request.
///
/// Serialized into response metadata so degraded answers are visible to
/// the caller without an error being raised.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Fallbacks(Vec<String>);

impl Fallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stage` if `outcome` fell back; logs the cause.
    pub fn note<T>(&mut self, stage: &str, outcome: &Outcome<T>) {
        if let Some(error) = outcome.error() {
            tracing::warn!(stage, %error, "stage fell back");
            self.push(stage);
        }
    }

    pub fn push(&mut self, stage: &str) {
        if !self.0.iter().any(|s| s == stage) {
            self.0.push(stage.to_string());
        }
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.0.iter().any(|s| s == stage)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result_ok_is_generated() {
        let o = Outcome::from_result(Ok::<_, StageError>(3), || 0);
        assert!(!o.is_fallback());
        assert_eq!(o.into_value(), 3);
    }

    #[test]
    fn test_from_result_err_builds_fallback() {
        let o = Outcome::from_result(Err(StageError::EmptyResponse), || 7);
        assert!(o.is_fallback());
        assert!(matches!(o.error(), Some(StageError::EmptyResponse)));
        assert_eq!(*o.value(), 7);
    }

    #[test]
    fn test_map_keeps_arm() {
        let o: Outcome<i32> = Outcome::Fallback {
            value: 2,
            error: StageError::schema("bad"),
        };
        let mapped = o.map(|v| v * 10);
        assert!(mapped.is_fallback());
        assert_eq!(mapped.into_value(), 20);
    }

    #[test]
    fn test_fallbacks_dedup() {
        let mut f = Fallbacks::new();
        f.note("rerank", &Outcome::Generated(()));
        assert!(f.is_empty());
        f.note(
            "rerank",
            &Outcome::Fallback {
                value: (),
                error: StageError::NoCandidates,
            },
        );
        f.push("rerank");
        assert_eq!(f.as_slice(), &["rerank".to_string()]);
        assert!(f.contains("rerank"));
    }
}
