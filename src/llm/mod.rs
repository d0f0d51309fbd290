//! LLM module - Language Model integrations
//!
//! Provides the provider abstraction the oracle is built on and an
//! OpenAI-compatible HTTP implementation.

pub mod client;
pub mod json;
pub mod traits;

pub use client::OpenAiClient;
pub use json::extract_json;
pub use traits::{Completion, LLMProvider, Sampling, TokenUsage};
