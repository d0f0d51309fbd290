//! Failure supervision
//!
//! Wraps a [`DiagnosisOracle`] so that diagnosis is total: any error from
//! the oracle becomes the fallback verdict instead of reaching the loop.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::history::ExecutionRecord;
use crate::browser::PageSnapshot;
use crate::core::{SupervisorVerdict, TaskPlan};
use crate::oracle::{DiagnosisOracle, DiagnosisRequest};

pub struct FailureSupervisor {
    oracle: Arc<dyn DiagnosisOracle>,
}

impl FailureSupervisor {
    pub fn new(oracle: Arc<dyn DiagnosisOracle>) -> Self {
        Self { oracle }
    }

    /// Diagnose a failed step. Never fails.
    pub async fn diagnose(
        &self,
        failing: &ExecutionRecord,
        snapshot: Option<&PageSnapshot>,
        plan: &TaskPlan,
        history: &[&ExecutionRecord],
    ) -> SupervisorVerdict {
        let request = DiagnosisRequest {
            failing,
            snapshot,
            plan,
            history,
        };

        match self.oracle.diagnose(&request).await {
            Ok(verdict) => {
                info!(
                    "Supervisor: {} ({}) -> {}",
                    verdict.failure_type, verdict.reason, verdict.solution
                );
                verdict
            }
            Err(e) => {
                warn!("Diagnosis unavailable, retrying current step: {}", e);
                SupervisorVerdict::fallback(format!("diagnosis failed: {}", e))
            }
        }
    }
}
