//! Agent module - the perceive-plan-act-verify loop and its drivers

pub mod history;
pub mod loop_state;
pub mod orchestrator;
pub mod runner;
pub mod services;
pub mod supervisor;

pub use history::{ExecutionHistory, ExecutionRecord, StepResult};
pub use loop_state::{ExecutionStats, LoopLimits, OrchestratorState, Termination};
pub use orchestrator::{Orchestrator, TaskContext, TaskOutcome};
pub use runner::{RunOutcome, SubTaskReport, TaskRunner};
pub use services::Services;
pub use supervisor::FailureSupervisor;
