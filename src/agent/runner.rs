//! Prompt-level task runner
//!
//! Classifies the prompt, answers directly when no browsing is needed, and
//! otherwise plans the task and runs its sub-tasks in dependency order:
//! the sub-task's browser tool first, then an orchestrator run for its page
//! steps. Sub-tasks whose dependencies failed are skipped.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::orchestrator::{Orchestrator, TaskContext, TaskOutcome};
use crate::agent::services::Services;
use crate::core::config::AgentConfig;
use crate::core::{Intent, Result, SubTask, TaskPlan};

/// Report for one sub-task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
    pub skipped: bool,
}

impl SubTaskReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tool_output: None,
            error: None,
            outcome: None,
            skipped: false,
        }
    }

    fn succeeded(&self) -> bool {
        !self.skipped
            && self.error.is_none()
            && self.outcome.as_ref().map_or(true, |o| o.success)
    }
}

/// What a prompt produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Answered without the browser
    Answered { intent: Intent, answer: String },
    /// Ran a browser plan
    Executed {
        success: bool,
        stopped: bool,
        plan: TaskPlan,
        sub_tasks: Vec<SubTaskReport>,
    },
}

pub struct TaskRunner {
    services: Services,
    orchestrator: Orchestrator,
}

impl TaskRunner {
    pub fn new(services: Services, config: AgentConfig) -> Self {
        let orchestrator = Orchestrator::new(&services, config);
        Self {
            services,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one user prompt end to end
    pub async fn run(&self, prompt: &str, stop: CancellationToken) -> Result<RunOutcome> {
        let intent = match self.services.planner.classify_intent(prompt).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Intent classification failed: {}", e);
                Intent::default()
            }
        };
        info!("Intent: {:?}", intent.task_types);

        if !intent.needs_browser() {
            let answer = self.services.planner.answer(prompt).await?;
            return Ok(RunOutcome::Answered { intent, answer });
        }

        let plan = self.services.planner.build_plan(prompt).await?;
        let plan = if plan.sub_tasks.is_empty() {
            TaskPlan::single(prompt, prompt, vec![prompt.to_string()])
        } else {
            plan.normalize_single_site()?
        };
        self.execute_plan(prompt, plan, stop).await
    }

    /// Run a validated plan's sub-tasks in dependency order
    pub async fn execute_plan(
        &self,
        goal: &str,
        plan: TaskPlan,
        stop: CancellationToken,
    ) -> Result<RunOutcome> {
        plan.validate()?;
        let order = plan.execution_order()?;
        info!("Executing plan '{}' ({} sub-tasks)", plan.name, order.len());

        let mut failed: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(order.len());
        let mut stopped = false;

        for index in order {
            if stop.is_cancelled() {
                stopped = true;
                break;
            }
            let sub_task = &plan.sub_tasks[index];

            let failed_dep = sub_task.dependencies.iter().find(|d| failed.contains(*d));
            let report = if let Some(dep) = failed_dep {
                info!("Skipping '{}': dependency '{}' failed", sub_task.name, dep);
                SubTaskReport {
                    skipped: true,
                    ..SubTaskReport::new(&sub_task.name)
                }
            } else {
                self.run_sub_task(goal, &plan, sub_task, stop.clone()).await?
            };

            if report.outcome.as_ref().is_some_and(|o| o.stopped) {
                stopped = true;
            }
            if !report.succeeded() {
                failed.insert(sub_task.name.clone());
            }
            reports.push(report);
            if stopped {
                break;
            }
        }

        let success = !stopped
            && reports.len() == plan.sub_tasks.len()
            && reports.iter().all(SubTaskReport::succeeded);
        Ok(RunOutcome::Executed {
            success,
            stopped,
            plan,
            sub_tasks: reports,
        })
    }

    async fn run_sub_task(
        &self,
        goal: &str,
        plan: &TaskPlan,
        sub_task: &SubTask,
        stop: CancellationToken,
    ) -> Result<SubTaskReport> {
        let mut report = SubTaskReport::new(&sub_task.name);

        if let Some(tool) = &sub_task.browser_task {
            info!("Running tool {} for '{}'", tool.tool_name, sub_task.name);
            match self.services.tabs.run(tool).await {
                Ok(output) => report.tool_output = Some(output),
                Err(e) => {
                    warn!("Tool {} failed: {}", tool.tool_name, e);
                    report.error = Some(e.to_string());
                    return Ok(report);
                }
            }
        }

        if !sub_task.web_content_tasks.is_empty() {
            let focus = format!(
                "{} - {}",
                sub_task.name,
                sub_task.web_content_tasks.join("; ")
            );
            let context = TaskContext::new(goal, plan.clone()).with_focus(focus);
            report.outcome = Some(self.orchestrator.run(context, stop).await?);
        }
        Ok(report)
    }
}
