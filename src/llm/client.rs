//! OpenAI-compatible chat completion client
//!
//! Sends a bearer-authenticated POST with the model id, the message list
//! and sampling parameters. Retries are left to the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::config::OracleConfig;
use crate::core::{Message, PilotError, Result};
use crate::llm::traits::{Completion, LLMProvider, Sampling, TokenUsage};

/// Client for `/v1/chat/completions` style endpoints
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client from the oracle section of the configuration
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PilotError::oracle(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Log a payload at debug level, truncated
    fn debug_payload(label: &str, content: &str) {
        let shown: String = content.chars().take(500).collect();
        if shown.len() < content.len() {
            debug!(target: "webpilot::llm", "{}: {}...", label, shown);
        } else {
            debug!(target: "webpilot::llm", "{}: {}", label, shown);
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model,
            messages,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p,
            stream: false,
        };
        Self::debug_payload("Request", &serde_json::to_string(&request)?);

        let mut post = self.client.post(&self.api_url).json(&request);
        if let Some(key) = &self.api_key {
            post = post.bearer_auth(key);
        }

        let response = post.send().await.map_err(|e| {
            if e.is_connect() {
                PilotError::oracle(format!("oracle unreachable at {}", self.api_url))
            } else if e.is_timeout() {
                PilotError::oracle("oracle request timed out")
            } else {
                PilotError::from(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PilotError::oracle(format!("oracle returned {}: {}", status, body)));
        }
        Self::debug_payload("Response", &body);

        let ChatResponse {
            model: served_by,
            choices,
            usage,
        } = serde_json::from_str(&body)?;
        let text = choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| PilotError::oracle("oracle reply carried no message content"))?;

        Ok(Completion {
            text,
            model: if served_by.is_empty() {
                model.to_string()
            } else {
                served_by
            },
            usage,
        })
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
