//! Evidence-backed report synthesis over a fixed candidate set.
//!
//! Generated citations are checked against the candidates: evidence and
//! related resources naming an id outside the set are dropped. The pool
//! and title of a kept citation always come from the candidate itself.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::models::{Evidence, RelatedResource, ResearchReport, SearchHit};
use research_harness_core::outcome::{Outcome, StageError};
use research_harness_core::store::preview;

use super::{Agent, CandidateSet};

pub const SYSTEM_PROMPT: &str = "\
You write research reports for support agents from search results.
Rules:
- The summary answers the question directly, combining all relevant sources (2-4 paragraphs).
- Every claim in the summary must be backed by an evidence item.
- Use source_id values exactly as given in the search results.
- related_resources are sources that are tangentially useful but not cited in the summary.
- If sources disagree, say so in the summary.

Respond ONLY with JSON:
{\"summary\": \"...\",
 \"evidence\": [{\"source_id\": \"...\", \"title\": \"...\", \"relevance\": \"...\", \"content_preview\": \"...\"}],
 \"related_resources\": [{\"source_id\": \"...\", \"title\": \"...\", \"why_relevant\": \"...\"}]}";

pub const FALLBACK_SUMMARY: &str =
    "Synthesis failed. Here are the raw search results ranked by relevance.";

const MAX_OUTPUT: u32 = 2000;
const CONTEXT_TITLE_CHARS: usize = 150;
const CONTEXT_PREVIEW_CHARS: usize = 300;
const EVIDENCE_PREVIEW_CHARS: usize = 200;
const FALLBACK_EVIDENCE: usize = 10;

#[derive(Debug, Deserialize)]
struct RawReport {
    summary: String,
    #[serde(default)]
    evidence: Vec<RawEvidence>,
    #[serde(default)]
    related_resources: Vec<RawRelated>,
}

#[derive(Debug, Deserialize)]
struct RawEvidence {
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    relevance: Option<String>,
    #[serde(default)]
    content_preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelated {
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    why_relevant: Option<String>,
}

pub struct Synthesizer {
    provider: Arc<dyn GenerationProvider>,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Deterministic report from the top candidates; no generated content.
    pub fn fallback(candidates: &[SearchHit]) -> ResearchReport {
        ResearchReport {
            summary: FALLBACK_SUMMARY.to_string(),
            evidence: candidates
                .iter()
                .take(FALLBACK_EVIDENCE)
                .map(|c| Evidence {
                    source_id: c.source_id.clone(),
                    pool: c.pool,
                    title: c.title.clone(),
                    relevance: format!("Similarity score: {:.3}", c.score),
                    content_preview: preview(&c.content_preview, EVIDENCE_PREVIEW_CHARS),
                })
                .collect(),
            related_resources: Vec::new(),
        }
    }
}

fn user_prompt(question: &str, candidates: &[SearchHit]) -> String {
    let context: Vec<String> = candidates
        .iter()
        .map(|c| {
            format!(
                "[{}] (type: {}, score: {:.3}) {}\n{}",
                c.source_id,
                c.pool,
                c.score,
                preview(&c.title, CONTEXT_TITLE_CHARS),
                preview(&c.content_preview, CONTEXT_PREVIEW_CHARS)
            )
        })
        .collect();
    format!(
        "Question: {}\n\nSearch results:\n{}",
        question,
        context.join("\n\n")
    )
}

/// Keep only citations of known candidates.
fn validate(raw: RawReport, candidates: &[SearchHit]) -> Result<ResearchReport, StageError> {
    if raw.summary.trim().is_empty() {
        return Err(StageError::schema("report summary is empty"));
    }
    let by_id: HashMap<&str, &SearchHit> = candidates
        .iter()
        .map(|c| (c.source_id.as_str(), c))
        .collect();

    let evidence = raw
        .evidence
        .into_iter()
        .filter_map(|e| {
            let hit = by_id.get(e.source_id.as_deref()?)?;
            Some(Evidence {
                source_id: hit.source_id.clone(),
                pool: hit.pool,
                title: hit.title.clone(),
                relevance: e.relevance.unwrap_or_default(),
                content_preview: e
                    .content_preview
                    .unwrap_or_else(|| preview(&hit.content_preview, EVIDENCE_PREVIEW_CHARS)),
            })
        })
        .collect();

    let related_resources = raw
        .related_resources
        .into_iter()
        .filter_map(|r| {
            let hit = by_id.get(r.source_id.as_deref()?)?;
            Some(RelatedResource {
                source_id: hit.source_id.clone(),
                pool: hit.pool,
                title: hit.title.clone(),
                why_relevant: r.why_relevant.unwrap_or_default(),
            })
        })
        .collect();

    Ok(ResearchReport {
        summary: raw.summary.trim().to_string(),
        evidence,
        related_resources,
    })
}

#[async_trait]
impl Agent for Synthesizer {
    type Input = CandidateSet;
    type Output = ResearchReport;

    fn stage(&self) -> &'static str {
        "synthesis"
    }

    async fn run(&self, input: CandidateSet) -> Outcome<ResearchReport> {
        let CandidateSet {
            question,
            candidates,
        } = input;
        if candidates.is_empty() {
            return Outcome::Fallback {
                value: Synthesizer::fallback(&candidates),
                error: StageError::NoCandidates,
            };
        }

        let prompt = user_prompt(&question, &candidates);
        let result =
            complete_json::<RawReport>(self.provider.as_ref(), SYSTEM_PROMPT, &prompt, MAX_OUTPUT)
                .await
                .and_then(|raw| validate(raw, &candidates));
        Outcome::from_result(result, || Synthesizer::fallback(&candidates))
    }
}
