use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Map;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use research_harness::agents::{
    classifier, decomposer, gap, kb_draft, reranker, router, synthesizer,
};
use research_harness_core::embedding::EmbeddingProvider;
use research_harness_core::generation::GenerationProvider;
use research_harness_core::models::{Document, Pool, SearchHit};
use research_harness_core::store::memory::InMemoryIndex;
use research_harness_core::store::DocumentIndex;

// ============ Generation ============

type Reply = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Generation provider answering per stage, keyed by system prompt.
/// Stages without a reply fail like an unreachable provider.
#[derive(Default)]
pub struct StageScript {
    replies: HashMap<&'static str, Reply>,
    calls: Mutex<HashMap<&'static str, usize>>,
    total: AtomicUsize,
    prompts: Mutex<Vec<(String, String)>>,
}

pub fn stage_prompt(stage: &str) -> &'static str {
    match stage {
        "routing" => router::SYSTEM_PROMPT,
        "classification" => classifier::SYSTEM_PROMPT,
        "decomposition" => decomposer::SYSTEM_PROMPT,
        "rerank" => reranker::SYSTEM_PROMPT,
        "synthesis" => synthesizer::SYSTEM_PROMPT,
        "gap_confirmation" => gap::SYSTEM_PROMPT,
        "kb_draft" => kb_draft::SYSTEM_PROMPT,
        other => panic!("unknown stage {other}"),
    }
}

impl StageScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, stage: &str, answer: &str) -> Self {
        let answer = answer.to_string();
        self.replies
            .insert(stage_prompt(stage), Box::new(move |_| Ok(answer.clone())));
        self
    }

    #[allow(dead_code)]
    pub fn reply_with(
        mut self,
        stage: &str,
        f: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.replies.insert(stage_prompt(stage), Box::new(f));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[allow(dead_code)]
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn calls(&self, stage: &str) -> usize {
        let key = stage_prompt(stage);
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// User prompt of the last call made with `stage`'s system prompt.
    #[allow(dead_code)]
    pub fn last_user(&self, stage: &str) -> Option<String> {
        let key = stage_prompt(stage);
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(system, _)| system == key)
            .map(|(_, user)| user.clone())
    }
}

#[async_trait]
impl GenerationProvider for StageScript {
    fn model_name(&self) -> &str {
        "stage-script"
    }

    async fn complete(&self, system: &str, user: &str, _max_output: u32) -> Result<String> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        let Some((key, reply)) = self.replies.iter().find(|(k, _)| **k == system) else {
            bail!("connection refused");
        };
        *self.calls.lock().unwrap().entry(*key).or_insert(0) += 1;
        reply(user)
    }
}

// ============ Embedding ============

/// Embeds by keyword: "alpha" → e0, "beta" → e1, anything else → e2.
pub struct KeywordEmbedder {
    pub batches: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: AtomicUsize::new(0),
        })
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        if text.contains("alpha") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("beta") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Embedding provider that always fails.
#[allow(dead_code)]
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

// ============ Index ============

pub fn document(id: &str, pool: Pool, title: &str, body: &str) -> Document {
    Document {
        id: id.into(),
        pool,
        title: title.into(),
        body: body.into(),
        category: None,
        metadata: Map::new(),
    }
}

/// KB-A1..6 (alpha), KB-B1..6 (beta), SCRIPT-1..8 and TR-1..6.
pub fn support_corpus() -> InMemoryIndex {
    let index = InMemoryIndex::new();
    let add = |doc: Document| {
        let vector = KeywordEmbedder::vector(&doc.body);
        index.insert(doc, Some(vector)).unwrap();
    };
    for i in 1..=6 {
        add(document(
            &format!("KB-A{i}"),
            Pool::Kb,
            &format!("Alpha guide {i}"),
            &format!("alpha voucher workflow step {i}"),
        ));
        add(document(
            &format!("KB-B{i}"),
            Pool::Kb,
            &format!("Beta guide {i}"),
            &format!("beta move-in configuration {i}"),
        ));
    }
    for i in 1..=8 {
        add(document(
            &format!("SCRIPT-{i}"),
            Pool::Script,
            &format!("Data fix {i}"),
            &format!("UPDATE vouchers SET status = <STATUS> WHERE batch = {i}"),
        ));
    }
    for i in 1..=6 {
        add(document(
            &format!("TR-{i}"),
            Pool::TicketResolution,
            &format!("Ticket {i}"),
            &format!("resolved voucher ticket {i}"),
        ));
    }
    index
}

/// Fails every lexical query whose text contains `FAIL`, and every query
/// against `down_pool`.
#[allow(dead_code)]
pub struct FailingIndex {
    pub inner: InMemoryIndex,
    pub down_pool: Option<Pool>,
}

#[async_trait]
impl DocumentIndex for FailingIndex {
    async fn semantic_query(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if self.down_pool == Some(pool) {
            bail!("pool {pool} unavailable");
        }
        self.inner.semantic_query(pool, embedding, limit).await
    }

    async fn lexical_query(&self, pool: Pool, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if text.contains("FAIL") || self.down_pool == Some(pool) {
            bail!("database is locked");
        }
        self.inner.lexical_query(pool, text, limit).await
    }
}

/// Holds every semantic query until `parties` of them are in flight.
#[allow(dead_code)]
pub struct BarrierIndex {
    pub inner: InMemoryIndex,
    pub barrier: Barrier,
    pub semantic_calls: AtomicUsize,
}

#[allow(dead_code)]
impl BarrierIndex {
    pub fn new(inner: InMemoryIndex, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            semantic_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentIndex for BarrierIndex {
    async fn semantic_query(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        self.barrier.wait().await;
        self.inner.semantic_query(pool, embedding, limit).await
    }

    async fn lexical_query(&self, pool: Pool, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.inner.lexical_query(pool, text, limit).await
    }
}

/// Ids cited as `[ID]` at line starts in a synthesis or rerank prompt.
#[allow(dead_code)]
pub fn prompt_ids(user: &str) -> Vec<String> {
    user.lines()
        .filter_map(|line| {
            let rest = line.strip_prefix('[')?;
            let end = rest.find(']')?;
            Some(rest[..end].to_string())
        })
        .collect()
}
