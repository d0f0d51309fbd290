//! Oracle backed by a chat-completion model

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::config::OracleConfig;
use crate::core::{
    Instruction, Intent, Message, OracleProtocolError, Result, SupervisorVerdict, TaskPlan,
};
use crate::llm::{extract_json, LLMProvider, Sampling};
use crate::oracle::prompts;
use crate::oracle::{
    DiagnosisOracle, DiagnosisRequest, InstructionOracle, InstructionRequest, TaskPlanner,
};

/// Classification favours recall over determinism
const INTENT_TEMPERATURE: f32 = 0.9;
const INTENT_MAX_TOKENS: u32 = 256;

/// Implements every oracle role with one model
pub struct LlmOracle {
    llm: Arc<dyn LLMProvider>,
    model: String,
    sampling: Sampling,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LLMProvider>, config: &OracleConfig) -> Self {
        Self {
            llm,
            model: config.model.clone(),
            sampling: Sampling {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                top_p: Some(config.top_p),
            },
        }
    }

    async fn ask(&self, system: String, user: &str, sampling: Sampling) -> Result<String> {
        let messages = [Message::system(system), Message::user(user)];
        let completion = self.llm.complete(&self.model, &messages, &sampling).await?;
        match completion.usage {
            Some(usage) => debug!(
                "{} via {} answered {} chars ({} tokens)",
                completion.model,
                self.llm.name(),
                completion.text.len(),
                usage.total_tokens
            ),
            None => debug!(
                "{} via {} answered {} chars",
                completion.model,
                self.llm.name(),
                completion.text.len()
            ),
        }
        Ok(completion.text)
    }

    async fn ask_json(&self, system: String, user: &str, sampling: Sampling) -> Result<Value> {
        let content = self.ask(system, user, sampling).await?;
        Ok(extract_json(&content)?)
    }
}

#[async_trait]
impl InstructionOracle for LlmOracle {
    async fn next_instruction(&self, request: &InstructionRequest<'_>) -> Result<Instruction> {
        let system = prompts::instruction_system(
            request.goal,
            request.focus,
            request.plan,
            request.snapshot,
            request.history,
        );
        let value = self
            .ask_json(system, "Decide the next action.", self.sampling)
            .await?;

        let instruction: Instruction = serde_json::from_value(value)
            .map_err(|e| OracleProtocolError::MalformedResponse(e.to_string()))?;
        instruction.validate()?;
        Ok(instruction)
    }
}

#[async_trait]
impl DiagnosisOracle for LlmOracle {
    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> Result<SupervisorVerdict> {
        let system = prompts::diagnosis_system(
            request.failing,
            request.snapshot,
            request.plan,
            request.history,
        );
        let value = self
            .ask_json(
                system,
                "Explain the failure and give the next action.",
                self.sampling,
            )
            .await?;
        Ok(SupervisorVerdict::from_value(value))
    }
}

#[async_trait]
impl TaskPlanner for LlmOracle {
    async fn classify_intent(&self, prompt: &str) -> Result<Intent> {
        let sampling = self
            .sampling
            .with_temperature(INTENT_TEMPERATURE)
            .with_max_tokens(INTENT_MAX_TOKENS);

        let value = self
            .ask_json(prompts::INTENT_SYSTEM.to_string(), prompt, sampling)
            .await?;
        let labels = value["task_types"].as_array().ok_or_else(|| {
            OracleProtocolError::MissingRequiredField("task_types".to_string())
        })?;
        Ok(Intent::from_labels(labels.iter().filter_map(Value::as_str)))
    }

    async fn build_plan(&self, prompt: &str) -> Result<TaskPlan> {
        let value = self
            .ask_json(prompts::PLAN_SYSTEM.to_string(), prompt, self.sampling)
            .await?;
        TaskPlan::from_value(value)
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        self.ask(prompts::ANSWER_SYSTEM.to_string(), prompt, self.sampling)
            .await
    }
}
