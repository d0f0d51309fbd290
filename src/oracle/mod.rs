//! Oracle module - the reasoning service consulted by the agent
//!
//! The agent only depends on these traits; [`LlmOracle`] implements all of
//! them on top of an [`LLMProvider`](crate::llm::LLMProvider).

pub mod llm;
pub mod prompts;

use async_trait::async_trait;

use crate::agent::history::ExecutionRecord;
use crate::browser::PageSnapshot;
use crate::core::{Instruction, Intent, Result, SupervisorVerdict, TaskPlan};

pub use llm::LlmOracle;

/// Everything the oracle sees when choosing the next instruction
#[derive(Debug, Clone, Copy)]
pub struct InstructionRequest<'a> {
    pub goal: &'a str,
    /// Sub-task currently being carried out, if the plan has several
    pub focus: Option<&'a str>,
    pub snapshot: &'a PageSnapshot,
    /// Most recent records, oldest first
    pub history: &'a [&'a ExecutionRecord],
    pub plan: &'a TaskPlan,
}

/// Everything the supervisor sees when diagnosing a failure
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisRequest<'a> {
    pub failing: &'a ExecutionRecord,
    pub snapshot: Option<&'a PageSnapshot>,
    pub plan: &'a TaskPlan,
    pub history: &'a [&'a ExecutionRecord],
}

/// Chooses the next instruction
#[async_trait]
pub trait InstructionOracle: Send + Sync {
    /// Return a structurally valid instruction or the completion marker.
    ///
    /// Responses without a recognised action or `completed` are reported
    /// as [`OracleProtocolError`](crate::core::OracleProtocolError).
    async fn next_instruction(&self, request: &InstructionRequest<'_>) -> Result<Instruction>;
}

/// Diagnoses failed steps
#[async_trait]
pub trait DiagnosisOracle: Send + Sync {
    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> Result<SupervisorVerdict>;
}

/// Classifies prompts, plans browser tasks and answers everything else
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    async fn classify_intent(&self, prompt: &str) -> Result<Intent>;

    async fn build_plan(&self, prompt: &str) -> Result<TaskPlan>;

    async fn answer(&self, prompt: &str) -> Result<String>;
}
