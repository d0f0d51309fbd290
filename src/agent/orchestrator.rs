//! Agent orchestrator
//!
//! Runs the perceive-plan-act-verify loop for one task:
//! SENSING -> PLANNING -> ACTING -> OBSERVING, with every failed step routed
//! through SUPERVISING. The snapshot captured while observing is the
//! perception for the next planning turn, so each iteration senses once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::history::{ExecutionHistory, ExecutionRecord, StepResult};
use crate::agent::loop_state::{ExecutionStats, LoopLimits, OrchestratorState, Termination};
use crate::agent::services::Services;
use crate::agent::supervisor::FailureSupervisor;
use crate::browser::{ActionExecutor, PageSensor, PageSnapshot};
use crate::core::config::AgentConfig;
use crate::core::{ActionKind, Instruction, PilotError, Result, SensorError, TaskPlan};
use crate::oracle::{InstructionOracle, InstructionRequest};

/// What a task is trying to achieve
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// The user's request
    pub goal: String,
    pub plan: TaskPlan,
    /// Sub-task currently in progress
    pub focus: Option<String>,
}

impl TaskContext {
    pub fn new(goal: impl Into<String>, plan: TaskPlan) -> Self {
        Self {
            goal: goal.into(),
            plan,
            focus: None,
        }
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }
}

/// Result of a finished task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub success: bool,
    pub stopped: bool,
    pub termination: Termination,
    pub history: Vec<ExecutionRecord>,
    pub iterations: usize,
    pub stats: ExecutionStats,
    /// Data returned by `extract` steps, in order
    pub extracted: Vec<Value>,
    /// Plan in force at the end, after any supervisor revisions
    pub plan: TaskPlan,
}

/// Mutable state of one run
struct RunState {
    plan: TaskPlan,
    history: ExecutionHistory,
    stats: ExecutionStats,
    iterations: usize,
    failure_streak: usize,
    /// Corrective instruction waiting to be executed
    pending: Option<Instruction>,
    /// Snapshot captured while observing, consumed by the next SENSING
    perceived: Option<Arc<PageSnapshot>>,
    /// Most recent snapshot of any origin
    latest: Option<Arc<PageSnapshot>>,
    extracted: Vec<Value>,
}

enum Step {
    Continue,
    Complete,
    Failed,
}

/// Marks the orchestrator busy for the lifetime of a run
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PilotError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequences sensor, oracle and executor for one task at a time
pub struct Orchestrator {
    sensor: Arc<PageSensor>,
    executor: Arc<ActionExecutor>,
    oracle: Arc<dyn InstructionOracle>,
    supervisor: FailureSupervisor,
    config: AgentConfig,
    running: AtomicBool,
    state: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(services: &Services, config: AgentConfig) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Init);
        Self {
            sensor: Arc::clone(&services.sensor),
            executor: Arc::clone(&services.executor),
            oracle: Arc::clone(&services.instructions),
            supervisor: FailureSupervisor::new(Arc::clone(&services.diagnosis)),
            config,
            running: AtomicBool::new(false),
            state,
        }
    }

    /// Current phase
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Watch phase transitions
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn enter(&self, state: OrchestratorState) {
        debug!("-> {}", state);
        self.state.send_replace(state);
    }

    /// Run a task until completion, stop, or a configured limit.
    ///
    /// Fails only when a run is already in progress or no page target
    /// exists at start; every other failure is supervised inside the loop.
    pub async fn run(&self, task: TaskContext, stop: CancellationToken) -> Result<TaskOutcome> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.enter(OrchestratorState::Init);

        if let Err(e) = self.sensor.ensure_target().await {
            self.enter(OrchestratorState::Terminated);
            return Err(match e {
                SensorError::NoTarget => PilotError::NoTarget,
                other => PilotError::Sensor(other),
            });
        }

        info!("Starting task: {}", task.goal);
        let limits = LoopLimits::from_config(&self.config);
        let mut run = RunState {
            plan: task.plan.clone(),
            history: ExecutionHistory::new(self.config.history_capacity),
            stats: ExecutionStats::default(),
            iterations: 0,
            failure_streak: 0,
            pending: None,
            perceived: None,
            latest: None,
            extracted: Vec::new(),
        };

        let termination = loop {
            if stop.is_cancelled() {
                info!("Stop requested after {} iterations", run.iterations);
                break Termination::Stopped;
            }
            if let Some(message) = limits.iterations_exhausted(run.iterations) {
                break Termination::Error { message };
            }
            run.iterations += 1;

            let step = match run.pending.take() {
                Some(corrective) => self.corrective_step(&mut run, corrective).await,
                None => self.planned_step(&task, &mut run).await,
            };

            match step {
                Step::Continue => run.failure_streak = 0,
                Step::Complete => {
                    self.enter(OrchestratorState::Complete);
                    break Termination::Success;
                }
                Step::Failed => {
                    run.failure_streak += 1;
                    if let Some(message) = limits.failures_exhausted(run.failure_streak) {
                        break Termination::Error { message };
                    }
                    // No new oracle round-trips once stopping
                    if !stop.is_cancelled() {
                        self.supervise(&mut run).await;
                    }
                }
            }
        };

        self.enter(OrchestratorState::Terminated);
        info!(
            "Task finished: {:?} after {} iterations ({} steps, {}% errors)",
            termination, run.iterations, run.stats.total, run.stats.error_rate
        );

        Ok(TaskOutcome {
            success: termination == Termination::Success,
            stopped: termination == Termination::Stopped,
            termination,
            history: run.history.into_vec(),
            iterations: run.iterations,
            stats: run.stats,
            extracted: run.extracted,
            plan: run.plan,
        })
    }

    /// SENSING -> PLANNING -> ACTING -> OBSERVING
    async fn planned_step(&self, task: &TaskContext, run: &mut RunState) -> Step {
        self.enter(OrchestratorState::Sensing);
        let snapshot = match run.perceived.take() {
            Some(snapshot) => snapshot,
            None => match self.sensor.capture().await {
                Ok(snapshot) => Arc::new(snapshot),
                Err(e) => {
                    warn!("Sensing failed: {}", e);
                    let result = StepResult::failure(format!("sensing failed: {}", e), 0);
                    self.record(run, None, None, result);
                    return Step::Failed;
                }
            },
        };
        run.latest = Some(Arc::clone(&snapshot));

        self.enter(OrchestratorState::Planning);
        let started = Instant::now();
        run.stats.oracle_calls += 1;
        let planned = {
            let recent = run.history.recent(self.config.context_window);
            let request = InstructionRequest {
                goal: &task.goal,
                focus: task.focus.as_deref(),
                snapshot: &snapshot,
                history: &recent,
                plan: &run.plan,
            };
            self.oracle.next_instruction(&request).await
        };

        let instruction = match planned {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!("Planning failed: {}", e);
                let result =
                    StepResult::failure(format!("planning failed: {}", e), elapsed_ms(started));
                self.record(run, None, Some(snapshot), result);
                return Step::Failed;
            }
        };

        if instruction.is_completed() {
            info!("Oracle reports the task complete");
            return Step::Complete;
        }

        self.act(run, instruction, snapshot, false).await
    }

    /// Execute a supervisor-issued instruction without a planning turn
    async fn corrective_step(&self, run: &mut RunState, instruction: Instruction) -> Step {
        if instruction.is_completed() {
            info!("Supervisor reports the task complete");
            return Step::Complete;
        }

        let snapshot = match run.latest.clone() {
            Some(snapshot) => snapshot,
            None => {
                self.enter(OrchestratorState::Sensing);
                match self.sensor.capture().await {
                    Ok(snapshot) => Arc::new(snapshot),
                    Err(e) => {
                        let result = StepResult::failure(format!("sensing failed: {}", e), 0);
                        self.record(run, Some(instruction), None, result);
                        return Step::Failed;
                    }
                }
            }
        };
        // The corrective step supersedes any pending perception
        run.perceived = None;
        run.latest = Some(Arc::clone(&snapshot));

        self.act(run, instruction, snapshot, true).await
    }

    /// ACTING -> OBSERVING
    async fn act(
        &self,
        run: &mut RunState,
        instruction: Instruction,
        snapshot_before: Arc<PageSnapshot>,
        corrective: bool,
    ) -> Step {
        self.enter(OrchestratorState::Acting);
        let started = Instant::now();
        let executed = self.executor.execute(&instruction, &snapshot_before).await;
        let duration_ms = elapsed_ms(started);

        self.enter(OrchestratorState::Observing);
        if executed.is_ok() && instruction.kind() != Some(ActionKind::Wait) {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
        let observed = self.sensor.capture().await.map(Arc::new);
        if let Ok(snapshot) = &observed {
            run.perceived = Some(Arc::clone(snapshot));
            run.latest = Some(Arc::clone(snapshot));
        }

        let (result, outcome) = match (executed, observed) {
            (Ok(action), Ok(_)) => {
                if instruction.kind() == Some(ActionKind::Extract) {
                    if let Some(data) = &action.data {
                        run.extracted.push(data.clone());
                    }
                }
                (StepResult::success(action.data, duration_ms), Step::Continue)
            }
            (Err(e), _) => {
                warn!("{} failed: {}", instruction.label(), e);
                (StepResult::failure(e.to_string(), duration_ms), Step::Failed)
            }
            (Ok(action), Err(e)) => {
                warn!("Observation after {} failed: {}", instruction.label(), e);
                let mut result =
                    StepResult::failure(format!("observation failed: {}", e), duration_ms);
                result.data = action.data;
                (result, Step::Failed)
            }
        };

        let record = ExecutionRecord::new(Some(instruction), Some(snapshot_before), result);
        let record = if corrective { record.corrective() } else { record };
        self.push(run, record);
        outcome
    }

    /// SUPERVISING: diagnose the last record and apply the verdict
    async fn supervise(&self, run: &mut RunState) {
        self.enter(OrchestratorState::Supervising);
        let verdict = {
            let Some(failing) = run.history.last() else {
                return;
            };
            let recent = run.history.recent(self.config.context_window);
            self.supervisor
                .diagnose(failing, run.latest.as_deref(), &run.plan, &recent)
                .await
        };
        run.stats.supervisor_interventions += 1;
        run.stats.oracle_calls += 1;

        if verdict.replaces_plan() {
            if let Some(plan) = verdict.revised_plan.clone() {
                info!("Supervisor replaced the plan with '{}'", plan.name);
                run.plan = plan;
                run.stats.replans += 1;
            }
        }
        run.pending = verdict.next_instruction;
    }

    fn record(
        &self,
        run: &mut RunState,
        instruction: Option<Instruction>,
        snapshot_before: Option<Arc<PageSnapshot>>,
        result: StepResult,
    ) {
        self.push(run, ExecutionRecord::new(instruction, snapshot_before, result));
    }

    fn push(&self, run: &mut RunState, record: ExecutionRecord) {
        run.stats.record_step(record.result.is_error());
        run.history.push(record);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
