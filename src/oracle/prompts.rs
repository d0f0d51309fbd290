//! System prompts for the reasoning oracle

use serde_json::{json, Value};

use crate::agent::history::ExecutionRecord;
use crate::browser::PageSnapshot;
use crate::core::TaskPlan;

const ACTIONS: &str = r#"Supported actions:
- "search": type `value` into `target` and press Enter (needs target, value)
- "click": click `target` (needs target)
- "input": type `value` into `target` without submitting (needs target, value)
- "wait": pause for `wait` milliseconds
- "scroll_page_down" / "scroll_page_up": scroll one viewport
- "navigate": open the absolute `url`
- "extract": read the text or value of `target` (needs target)
`target` is always the numeric `handle` of an element in the current page tree.
Never use CSS selectors."#;

pub const INTENT_SYSTEM: &str = r#"You classify user requests. Reply with JSON only:
{"task_types": ["browser_use"]}
Choose one or more of: "general", "analysis", "code", "image", "translation", "browser_use", "other".
Use "browser_use" when the request needs live or site-specific information, web interaction
(login, forms, filtering, paging, clicking) or the user explicitly asks to open a site.
Do not use it for static knowledge that can be answered directly."#;

pub const PLAN_SYSTEM: &str = r#"You plan browser tasks. Reply with JSON only:
{
  "name": "task name",
  "description": "what the task achieves",
  "sub_tasks": [
    {
      "name": "unique sub-task name",
      "description": "what this sub-task does",
      "browser_task": {"tool_name": "open_tab", "parameters": {"url": "https://..."}},
      "web_content_tasks": ["step performed on the page", "..."],
      "dependencies": ["names of sub-tasks that must finish first"]
    }
  ]
}
Available tools: open_tab {url}, close_tab {}, query_tab {}.
`browser_task` is optional. Dependencies must form an acyclic graph.
If the whole task happens on one website, produce exactly one sub-task holding every page step."#;

pub const ANSWER_SYSTEM: &str = "You are a helpful assistant. Answer the user's request directly and concisely.";

/// System prompt for the next-instruction request
pub fn instruction_system(
    goal: &str,
    focus: Option<&str>,
    plan: &TaskPlan,
    snapshot: &PageSnapshot,
    history: &[&ExecutionRecord],
) -> String {
    let focus = focus
        .map(|f| format!("\nCurrent sub-task: {}\n", f))
        .unwrap_or_default();
    format!(
        r#"You drive a web browser one action at a time.

Goal: {goal}
{focus}
Plan:
{plan}

Recent steps (oldest first; pageUrl is the page each step started on):
{history}

Current page (visible viewport only):
{page}

Compare the current page with the page of the last step to judge whether it worked.
If the element you need is not visible, scroll. If the goal is achieved reply {{"completed": true}}.

{actions}

Reply with JSON only:
{{"action": "...", "description": "...", "target": "handle", "value": "...", "wait": 1000, "url": "...", "completed": false}}"#,
        goal = goal,
        focus = focus,
        plan = to_json(plan),
        history = history_json(history),
        page = snapshot.to_prompt_json(),
        actions = ACTIONS,
    )
}

/// System prompt for failure diagnosis
pub fn diagnosis_system(
    failing: &ExecutionRecord,
    snapshot: Option<&PageSnapshot>,
    plan: &TaskPlan,
    history: &[&ExecutionRecord],
) -> String {
    let page = snapshot
        .map(PageSnapshot::to_prompt_json)
        .unwrap_or_else(|| "unavailable".to_string());
    format!(
        r#"A browser automation step failed. Diagnose it and give the next action.

Failed step:
{failing}

Current page:
{page}

Plan:
{plan}

Recent steps:
{history}

{actions}

Reply with JSON only:
{{"failureType": "element_not_found|page_changed|wrong_order|other", "reason": "...", "solution": "...",
 "action": "...", "description": "...", "target": "handle", "value": "...", "wait": 1000, "url": "...",
 "completed": false, "needReplan": false, "revisedPlan": null}}
Provide a revisedPlan with the same shape as the plan only when the plan itself is wrong."#,
        failing = failing.to_prompt_value(),
        page = page,
        plan = to_json(plan),
        history = history_json(history),
        actions = ACTIONS,
    )
}

fn history_json(history: &[&ExecutionRecord]) -> String {
    let values: Vec<Value> = history.iter().map(|r| r.to_prompt_value()).collect();
    json!(values).to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
