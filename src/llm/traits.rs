//! Chat model abstraction the oracle is built on
//!
//! Every oracle role is a single system+user exchange answered in one
//! piece, so the provider surface is one non-streaming call. Tests back it
//! with canned completions.

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::{Message, Result};

/// One finished chat completion
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Model id reported by the endpoint, or the requested one
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Token accounting as reported by OpenAI-compatible endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Sampling parameters forwarded verbatim; `None` leaves the endpoint default
#[derive(Debug, Clone, Copy, Default)]
pub struct Sampling {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl Sampling {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run one completion over `messages`
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<Completion>;

    /// Short label used in logs
    fn name(&self) -> &str;
}
