//! Supervisor verdicts
//!
//! The diagnosis oracle answers with a flat object that mixes the verdict
//! fields with an optional corrective instruction. Parsing is lenient: any
//! field may be missing and a malformed revised plan is discarded rather
//! than failing the whole verdict.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::instruction::{de_opt_bool, de_opt_string, Instruction};
use crate::core::plan::TaskPlan;

/// Failure type used when no diagnosis is available
pub const UNKNOWN_FAILURE: &str = "unknown";
/// Solution used when no diagnosis is available
pub const RETRY_SOLUTION: &str = "retry current step";

/// Outcome of a failure diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorVerdict {
    pub failure_type: String,
    pub reason: String,
    pub solution: String,
    /// Corrective instruction executed before the next planning turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_instruction: Option<Instruction>,
    pub need_replan: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_plan: Option<TaskPlan>,
}

/// Wire shape of the diagnosis response
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    #[serde(default, deserialize_with = "de_opt_string", alias = "failure_type")]
    failure_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    reason: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    solution: Option<String>,
    #[serde(default, deserialize_with = "de_opt_bool", alias = "need_replan")]
    need_replan: Option<bool>,
    #[serde(default, alias = "revised_plan")]
    revised_plan: Option<Value>,
    #[serde(flatten)]
    instruction: Instruction,
}

impl SupervisorVerdict {
    /// Verdict used whenever diagnosis itself fails
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            failure_type: UNKNOWN_FAILURE.to_string(),
            reason: reason.into(),
            solution: RETRY_SOLUTION.to_string(),
            next_instruction: None,
            need_replan: false,
            revised_plan: None,
        }
    }

    /// Parse a verdict from the oracle's JSON value, filling gaps with
    /// fallback values
    pub fn from_value(value: Value) -> Self {
        let raw: RawVerdict = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => return Self::fallback(format!("unparseable verdict: {}", e)),
        };

        let revised_plan = raw
            .revised_plan
            .filter(|v| !v.is_null())
            .and_then(|v| TaskPlan::from_value(v).ok())
            .filter(|p| !p.sub_tasks.is_empty());

        let instruction = raw.instruction;
        let next_instruction = (instruction.action.is_some() || instruction.is_completed())
            .then_some(instruction)
            .filter(|i| i.validate().is_ok());

        Self {
            failure_type: raw
                .failure_type
                .unwrap_or_else(|| UNKNOWN_FAILURE.to_string()),
            reason: raw
                .reason
                .unwrap_or_else(|| "analysis unavailable".to_string()),
            solution: raw.solution.unwrap_or_else(|| RETRY_SOLUTION.to_string()),
            next_instruction,
            need_replan: raw.need_replan.unwrap_or(false),
            revised_plan,
        }
    }

    /// Whether the orchestrator should swap in a new plan
    pub fn replaces_plan(&self) -> bool {
        self.need_replan && self.revised_plan.is_some()
    }
}
