//! Core data models shared by the search engine and the research pipeline.
//!
//! Every record that crosses a stage boundary is a typed struct here:
//! generated text is parsed into these shapes at the generation boundary
//! and never travels through the pipeline as a free-form JSON blob.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One of the three document pools that partition the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    /// Remediation scripts (backend data fixes).
    #[serde(rename = "SCRIPT")]
    Script,
    /// How-to knowledge base articles.
    #[serde(rename = "KB")]
    Kb,
    /// Resolutions of past support tickets.
    #[serde(rename = "TICKET_RESOLUTION")]
    TicketResolution,
}

impl Pool {
    pub const ALL: [Pool; 3] = [Pool::Script, Pool::Kb, Pool::TicketResolution];

    /// Canonical wire label (`"SCRIPT"`, `"KB"`, `"TICKET_RESOLUTION"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Script => "SCRIPT",
            Pool::Kb => "KB",
            Pool::TicketResolution => "TICKET_RESOLUTION",
        }
    }

    /// Parse a pool label, ignoring case and surrounding whitespace.
    ///
    /// Returns `None` for anything outside the three canonical labels.
    pub fn parse(label: &str) -> Option<Pool> {
        let label = label.trim();
        Pool::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(label))
    }

    /// The pool searched alongside `self` for supplementary results.
    pub fn secondary(self) -> Pool {
        match self {
            Pool::Script => Pool::Kb,
            Pool::Kb => Pool::Script,
            Pool::TicketResolution => Pool::Kb,
        }
    }
}

/// Secondary pool for an arbitrary label; unknown labels map to KB.
pub fn secondary_pool(label: &str) -> Pool {
    Pool::parse(label).map(Pool::secondary).unwrap_or(Pool::Kb)
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown pool: {0:?} (expected SCRIPT, KB, or TICKET_RESOLUTION)")]
pub struct UnknownPool(pub String);

impl FromStr for Pool {
    type Err = UnknownPool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pool::parse(s).ok_or_else(|| UnknownPool(s.to_string()))
    }
}

/// A document as written into an index by the import pipeline.
///
/// The research core never writes; this type only exists so index
/// backends and the importer agree on one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (e.g. `"KB-0042"`).
    pub id: String,
    pub pool: Pool,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Pool-specific fields (ticket `module`, `priority`, `root_cause`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A single ranked search result.
///
/// `score` means different things at different stages: cosine similarity
/// from a semantic query, relevance from a lexical query, or the fused RRF
/// score after hybrid search. Scores are only compared within one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based position; contiguous once the final list is ranked.
    pub rank: usize,
    /// Pool this hit was retrieved from.
    pub pool: Pool,
    pub source_id: String,
    pub title: String,
    pub content_preview: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// `<PLACEHOLDER>` tokens found in a script body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

/// Assign contiguous 1-based ranks in list order.
pub fn assign_ranks(hits: &mut [SearchHit]) {
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
}

/// Intent classification of a question, with a search-optimized rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub pool: Pool,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub reasoning: String,
    pub rewritten_query: String,
}

/// How much work a question needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    Simple,
    Research,
}

/// A targeted sub-query produced by decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub query: String,
    pub pool: Pool,
    /// What this sub-query investigates.
    pub aspect: String,
}

/// Structured, evidence-backed answer to a research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub summary: String,
    pub evidence: Vec<Evidence>,
    pub related_resources: Vec<RelatedResource>,
}

/// A cited source. `source_id` always names a synthesis candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source_id: String,
    pub pool: Pool,
    pub title: String,
    pub relevance: String,
    pub content_preview: String,
}

/// A tangentially relevant source. `source_id` always names a synthesis candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedResource {
    pub source_id: String,
    pub pool: Pool,
    pub title: String,
    pub why_relevant: String,
}

/// Verdict on whether a resolved ticket carries knowledge the KB lacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAssessment {
    pub gap_detected: bool,
    pub description: String,
    pub suggested_title: Option<String>,
    pub best_match_id: Option<String>,
    pub best_match_similarity: f64,
}
