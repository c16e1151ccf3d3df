//! Generation provider trait and the boundary where generated text enters
//! the core.
//!
//! Generated text is untrusted: it may be wrapped in markdown fences, be
//! truncated, or not be JSON at all. [`complete_json`] is the single
//! parse-and-validate entry point used by every stage: transport errors,
//! empty responses, and unparsable payloads all come back as a
//! [`StageError`], never as a raw provider error.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::outcome::StageError;

/// A text generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Complete a single system + user exchange, producing at most
    /// `max_output` tokens of free text.
    async fn complete(&self, system: &str, user: &str, max_output: u32) -> Result<String>;
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
///
/// ```rust
/// use research_harness_core::generation::strip_fences;
///
/// assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
/// assert_eq!(strip_fences("  plain  "), "plain");
/// ```
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    let body = match body.rfind("```") {
        Some(pos) => &body[..pos],
        None => body,
    };
    body.trim()
}

/// Parse fenced or bare JSON into `T`.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, StageError> {
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return Err(StageError::EmptyResponse);
    }
    Ok(serde_json::from_str(cleaned)?)
}

/// Call the provider and return its trimmed, non-empty text.
pub async fn complete_text(
    provider: &dyn GenerationProvider,
    system: &str,
    user: &str,
    max_output: u32,
) -> Result<String, StageError> {
    let raw = provider
        .complete(system, user, max_output)
        .await
        .map_err(|e| StageError::Provider(format!("{:#}", e)))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StageError::EmptyResponse);
    }
    Ok(trimmed.to_string())
}

/// Call the provider and parse its answer as JSON of shape `T`.
///
/// Schema checks beyond what `T`'s `Deserialize` impl enforces are the
/// caller's job.
pub async fn complete_json<T: DeserializeOwned>(
    provider: &dyn GenerationProvider,
    system: &str,
    user: &str,
    max_output: u32,
) -> Result<T, StageError> {
    let raw = complete_text(provider, system, user, max_output).await?;
    parse_json(&raw)
}
