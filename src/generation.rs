//! Generation provider implementations.
//!
//! Concrete backends for the core [`GenerationProvider`] trait:
//! - **[`DisabledGenerator`]**: always errors, so every generative stage
//!   takes its fallback and the system degrades to plain hybrid search.
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions`.
//! - **[`OllamaGenerator`]**: `POST /api/chat` with `stream = false`.
//!
//! Two tiers are configured: [`Tier::Fast`] (`generation.model`) for the
//! short structured stages, and [`Tier::Synthesis`]
//! (`generation.synthesis_model`) for report synthesis.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use research_harness_core::generation::GenerationProvider;

use crate::config::GenerationConfig;
use crate::http;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Which configured model a generator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Synthesis,
}

/// Instantiate the generator for `tier` named by `config.provider`.
pub fn create_generator(config: &GenerationConfig, tier: Tier) -> Result<Arc<dyn GenerationProvider>> {
    let model = match tier {
        Tier::Fast => config.model.clone(),
        Tier::Synthesis => config.synthesis_model.clone(),
    };
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config, model)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config, model)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _system: &str, _user: &str, _max_output: u32) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI ============

/// Chat completions against the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig, model: String) -> Result<Self> {
        Ok(Self {
            model,
            api_key: http::openai_api_key()?,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str, max_output: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_completion_tokens": max_output,
        });
        let json = http::post_json(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

/// Chat against a local Ollama instance.
pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig, model: String) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            url,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str, max_output: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
            "options": {"num_predict": max_output},
        });
        let endpoint = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let json = http::post_json(
            &self.client,
            &endpoint,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_chat(&json)
    }
}

fn parse_ollama_chat(json: &Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
}
