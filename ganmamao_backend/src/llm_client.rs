use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http_client::build_http_client;
use crate::prompt::build_summary_prompt;

/// Text generation collaborator: one prompt in, one completion out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Produces the digest stored when the log is compacted.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    summary_max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Result<Self> {
        Ok(Self {
            api_url: openai_api_url(&api_url),
            api_key: api_key.unwrap_or_default(),
            model,
            temperature: 0.7,
            summary_max_tokens: 120,
            client: build_http_client(Some(Duration::from_secs(300)))?,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one chat completion against an OpenAI-compatible endpoint
    /// (Ollama, LM Studio, mlx_lm.server, vLLM, ...).
    pub async fn complete(&self, messages: Vec<Message>, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local servers usually run without a key.
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }
}

/// Normalize a server base URL to its OpenAI-compatible `/v1` root.
fn openai_api_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

fn user_message(content: &str) -> Vec<Message> {
    vec![Message {
        role: "user".to_string(),
        content: content.to_string(),
    }]
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        tracing::debug!("Prompt input:\n{}", prompt);
        self.complete(user_message(prompt), max_tokens).await
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let prompt = build_summary_prompt(transcript);
        let summary = self
            .complete(user_message(&prompt), self.summary_max_tokens)
            .await
            .context("Log summary generation failed")?;
        Ok(summary.trim().to_string())
    }
}
