//! Draft KB articles from resolved tickets, for human review.
//!
//! Usually follows a gap evaluation: the gap's `suggested_title` can be
//! passed along and is used when the provider gives no title of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use research_harness_core::generation::{complete_json, GenerationProvider};
use research_harness_core::outcome::{Outcome, StageError};

use super::Agent;

pub const SYSTEM_PROMPT: &str = "\
You are a technical writer for property-management software support.
Write a knowledge base article from a resolved support ticket.

- Title: clear and searchable, naming the issue and its resolution.
- Body, in order: problem description (what the user sees), root cause, numbered
  resolution steps, related information (category, module, affected roles).
- Use the conversation transcript, when given, for the user's experience.
- If a data-fix script was used, reference it by title but never include raw SQL.
- Keep placeholders such as <PROPERTY_ID> as placeholders.

Respond ONLY with JSON:
{\"title\": \"...\", \"body\": \"...\", \"category\": \"...\"}";

const MAX_OUTPUT: u32 = 1500;
const UNTITLED: &str = "Untitled";

/// A resolved ticket plus whatever context is known about it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub script_title: Option<String>,
    #[serde(default)]
    pub script_id: Option<String>,
    /// Title proposed by gap evaluation.
    #[serde(default)]
    pub suggested_title: Option<String>,
}

impl DraftRequest {
    fn category_label(&self) -> &str {
        non_blank(self.category.as_deref()).unwrap_or("General")
    }

    fn suggested(&self) -> Option<&str> {
        non_blank(self.suggested_title.as_deref())
    }
}

/// A draft article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbDraft {
    pub title: String,
    pub body: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct KbDrafter {
    provider: Arc<dyn GenerationProvider>,
}

impl KbDrafter {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Problem/resolution article built from the ticket text alone.
    pub fn fallback(request: &DraftRequest) -> KbDraft {
        let category = request.category_label();
        KbDraft {
            title: request
                .suggested()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Resolving {} Issues", category)),
            body: format!(
                "Problem Description:\n{}\n\nResolution:\n{}",
                request.description.trim(),
                request.resolution.trim()
            ),
            category: category.to_string(),
        }
    }
}

fn or_na(value: Option<&str>) -> &str {
    non_blank(value).unwrap_or("N/A")
}

fn user_prompt(request: &DraftRequest) -> String {
    let mut parts = vec![
        format!("Ticket ID: {}", or_na(request.ticket_id.as_deref())),
        format!("Category: {}", or_na(request.category.as_deref())),
        format!("Module: {}", or_na(request.module.as_deref())),
        format!("Root Cause: {}", or_na(request.root_cause.as_deref())),
        String::new(),
        "Description:".to_string(),
        non_blank(Some(request.description.as_str()))
            .unwrap_or("No description provided.")
            .to_string(),
        String::new(),
        "Resolution:".to_string(),
        non_blank(Some(request.resolution.as_str()))
            .unwrap_or("No resolution provided.")
            .to_string(),
    ];
    if let Some(transcript) = non_blank(request.transcript.as_deref()) {
        parts.extend([String::new(), "Conversation Transcript:".to_string(), transcript.to_string()]);
    }
    if let Some(script) = non_blank(request.script_title.as_deref()) {
        parts.push(String::new());
        parts.push(format!(
            "Data-fix Script Used: {} ({})",
            script,
            or_na(request.script_id.as_deref())
        ));
    }
    if let Some(title) = request.suggested() {
        parts.push(String::new());
        parts.push(format!("Suggested Title: {}", title));
    }
    parts.join("\n")
}

fn validate(raw: RawDraft, request: &DraftRequest) -> Result<KbDraft, StageError> {
    let body = non_blank(raw.body.as_deref())
        .ok_or_else(|| StageError::schema("draft body is empty"))?
        .to_string();
    let title = non_blank(raw.title.as_deref())
        .or_else(|| request.suggested())
        .unwrap_or(UNTITLED)
        .to_string();
    let category = non_blank(raw.category.as_deref())
        .unwrap_or_else(|| request.category_label())
        .to_string();
    Ok(KbDraft {
        title,
        body,
        category,
    })
}

#[async_trait]
impl Agent for KbDrafter {
    type Input = DraftRequest;
    type Output = KbDraft;

    fn stage(&self) -> &'static str {
        "kb_draft"
    }

    async fn run(&self, request: DraftRequest) -> Outcome<KbDraft> {
        let result =
            complete_json::<RawDraft>(self.provider.as_ref(), SYSTEM_PROMPT, &user_prompt(&request), MAX_OUTPUT)
                .await
                .and_then(|raw| validate(raw, &request));
        Outcome::from_result(result, || KbDrafter::fallback(&request))
    }
}
