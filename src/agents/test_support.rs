//! Scripted providers for stage unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use research_harness_core::embedding::EmbeddingProvider;
use research_harness_core::generation::GenerationProvider;

type Responder = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// Generation provider answering from a closure over `(system, user)`.
pub struct Scripted {
    respond: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(String, String, u32)>>,
}

impl Scripted {
    pub fn new(respond: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(answer: &str) -> Arc<Self> {
        let answer = answer.to_string();
        Self::new(move |_, _| Ok(answer.clone()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_, _| bail!("connection refused"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(user prompt, max_output)` of the most recent call.
    pub fn last_user(&self) -> Option<(String, u32)> {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .map(|(_, user, max)| (user.clone(), *max))
    }
}

#[async_trait]
impl GenerationProvider for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, user: &str, max_output: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string(), max_output));
        (self.respond)(system, user)
    }
}

/// Embedding provider returning one fixed vector for every text.
pub struct ConstEmbedder(pub Vec<f32>);

#[async_trait]
impl EmbeddingProvider for ConstEmbedder {
    fn model_name(&self) -> &str {
        "const"
    }
    fn dims(&self) -> usize {
        self.0.len()
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.0.clone()).collect())
    }
}
