//! Task plans produced by the planner oracle
//!
//! A plan is a set of named sub-tasks whose `dependencies` form a DAG.
//! Validation rejects duplicate names, dangling dependencies and cycles;
//! execution order is a topological sort that keeps declaration order
//! among independent sub-tasks.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::core::error::{PilotError, Result};

/// Tool name that opens a new tab
pub const OPEN_TAB: &str = "open_tab";

/// A structured plan for one user prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
}

/// One node of the plan graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// External tool invocation run before any page steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_task: Option<BrowserTask>,
    /// Natural-language steps carried out on the page by the orchestrator
    #[serde(default)]
    pub web_content_tasks: Vec<String>,
    /// Names of sub-tasks that must run first
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A browser tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserTask {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl BrowserTask {
    /// `open_tab` with a url
    pub fn open_tab(url: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("url".to_string(), Value::String(url.into()));
        Self {
            tool_name: OPEN_TAB.to_string(),
            parameters,
        }
    }

    /// String parameter lookup
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

impl TaskPlan {
    /// Plan with a single sub-task holding every page step
    pub fn single(
        name: impl Into<String>,
        description: impl Into<String>,
        web_content_tasks: Vec<String>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        Self {
            sub_tasks: vec![SubTask {
                name: name.clone(),
                description: description.clone(),
                browser_task: None,
                web_content_tasks,
                dependencies: Vec::new(),
            }],
            name,
            description,
        }
    }

    /// Reject duplicate names, unknown dependencies and cycles
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.sub_tasks {
            if task.name.trim().is_empty() {
                return Err(PilotError::plan("sub-task with an empty name"));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(PilotError::plan(format!(
                    "duplicate sub-task name '{}'",
                    task.name
                )));
            }
        }
        for task in &self.sub_tasks {
            for dep in &task.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(PilotError::plan(format!(
                        "sub-task '{}' depends on unknown '{}'",
                        task.name, dep
                    )));
                }
            }
        }
        self.execution_order().map(|_| ())
    }

    /// Topological order of sub-task indices.
    ///
    /// Among the tasks whose dependencies are done, the one declared first
    /// always runs next.
    pub fn execution_order(&self) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .sub_tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.sub_tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.sub_tasks.len()];
        for (i, task) in self.sub_tasks.iter().enumerate() {
            let deps: BTreeSet<usize> = task
                .dependencies
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect();
            indegree[i] = deps.len();
            for d in deps {
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> =
            (0..indegree.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.sub_tasks.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dep in &dependents[next] {
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }

        if order.len() != self.sub_tasks.len() {
            let stuck: Vec<&str> = (0..self.sub_tasks.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.sub_tasks[i].name.as_str())
                .collect();
            return Err(PilotError::plan(format!(
                "dependency cycle among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Distinct hosts across every `open_tab` url
    pub fn distinct_hosts(&self) -> BTreeSet<String> {
        self.sub_tasks
            .iter()
            .filter_map(|t| t.browser_task.as_ref())
            .filter(|b| b.tool_name == OPEN_TAB)
            .filter_map(|b| b.param("url"))
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect()
    }

    /// Whether the plan touches at most one site using only `open_tab`
    pub fn is_single_site(&self) -> bool {
        self.distinct_hosts().len() <= 1
            && self.sub_tasks.iter().all(|t| {
                t.browser_task
                    .as_ref()
                    .map_or(true, |b| b.tool_name == OPEN_TAB)
            })
    }

    /// Merge a single-site plan into exactly one sub-task.
    ///
    /// Page steps are concatenated in execution order; the first `open_tab`
    /// is kept as the tool invocation. Multi-site plans are returned as is.
    pub fn normalize_single_site(self) -> Result<Self> {
        if self.sub_tasks.len() <= 1 || !self.is_single_site() {
            return Ok(self);
        }

        let order = self.execution_order()?;
        let mut browser_task = None;
        let mut steps = Vec::new();
        for i in order {
            let task = &self.sub_tasks[i];
            if browser_task.is_none() {
                browser_task = task.browser_task.clone();
            }
            steps.extend(task.web_content_tasks.iter().cloned());
        }

        let merged_name = if self.name.trim().is_empty() {
            self.sub_tasks[0].name.clone()
        } else {
            self.name.clone()
        };

        Ok(Self {
            sub_tasks: vec![SubTask {
                name: merged_name,
                description: self.description.clone(),
                browser_task,
                web_content_tasks: steps,
                dependencies: Vec::new(),
            }],
            name: self.name,
            description: self.description,
        })
    }

    /// Look up a sub-task by name
    pub fn sub_task(&self, name: &str) -> Option<&SubTask> {
        self.sub_tasks.iter().find(|t| t.name == name)
    }

    /// Parse a plan from an untrusted JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let plan: TaskPlan = serde_json::from_value(value)?;
        plan.validate()?;
        Ok(plan)
    }
}
