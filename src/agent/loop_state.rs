//! Orchestrator loop state
//!
//! The phase machine, the optional loop limits and the counters reported
//! when a task terminates.

use serde::{Deserialize, Serialize};

use crate::core::config::AgentConfig;

/// Phase of the perceive-plan-act-verify loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Init,
    Sensing,
    Planning,
    Acting,
    Observing,
    Supervising,
    Complete,
    Terminated,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorState::Init => "INIT",
            OrchestratorState::Sensing => "SENSING",
            OrchestratorState::Planning => "PLANNING",
            OrchestratorState::Acting => "ACTING",
            OrchestratorState::Observing => "OBSERVING",
            OrchestratorState::Supervising => "SUPERVISING",
            OrchestratorState::Complete => "COMPLETE",
            OrchestratorState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The oracle declared the task complete
    Success,
    /// The stop signal was raised
    Stopped,
    /// A configured limit was exceeded
    Error { message: String },
}

/// Optional bounds on the loop; `None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: Option<usize>,
    pub max_consecutive_failures: Option<usize>,
}

impl LoopLimits {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }

    /// Message if `iterations` completed iterations exhaust the cap
    pub fn iterations_exhausted(&self, iterations: usize) -> Option<String> {
        self.max_iterations
            .filter(|&max| iterations >= max)
            .map(|max| format!("iteration limit of {} reached", max))
    }

    /// Message if the failure streak exceeds the cap
    pub fn failures_exhausted(&self, streak: usize) -> Option<String> {
        self.max_consecutive_failures
            .filter(|&max| streak > max)
            .map(|max| format!("more than {} consecutive failed steps", max))
    }
}

/// Counters accumulated over a whole task, independent of history eviction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Steps recorded
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of failed steps, rounded
    pub error_rate: u32,
    pub supervisor_interventions: usize,
    pub replans: usize,
    pub oracle_calls: usize,
}

impl ExecutionStats {
    /// Count one recorded step
    pub fn record_step(&mut self, failed: bool) {
        self.total += 1;
        if failed {
            self.failed += 1;
        } else {
            self.succeeded += 1;
        }
        self.error_rate = ((self.failed as f64 / self.total as f64) * 100.0).round() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_by_default() {
        let limits = LoopLimits::from_config(&AgentConfig::default());
        assert!(limits.iterations_exhausted(1_000_000).is_none());
        assert!(limits.failures_exhausted(1_000_000).is_none());
    }

    #[test]
    fn test_limits_trip() {
        let limits = LoopLimits {
            max_iterations: Some(3),
            max_consecutive_failures: Some(2),
        };
        assert!(limits.iterations_exhausted(2).is_none());
        assert!(limits.iterations_exhausted(3).is_some());
        assert!(limits.failures_exhausted(2).is_none());
        assert!(limits.failures_exhausted(3).is_some());
    }

    #[test]
    fn test_error_rate() {
        let mut stats = ExecutionStats::default();
        stats.record_step(false);
        stats.record_step(true);
        stats.record_step(false);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.error_rate, 33);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(OrchestratorState::Supervising.to_string(), "SUPERVISING");
    }
}
