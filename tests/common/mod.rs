//! Shared fixtures: an in-memory DevTools endpoint and scripted oracles
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use webpilot::agent::Services;
use webpilot::browser::CdpTransport;
use webpilot::core::{
    CdpError, Config, Instruction, Intent, PilotError, Result, SupervisorVerdict, TaskPlan,
};
use webpilot::oracle::{
    DiagnosisOracle, DiagnosisRequest, InstructionOracle, InstructionRequest, TaskPlanner,
};

// ---------------------------------------------------------------------------
// Page fixture
// ---------------------------------------------------------------------------

/// Element description used to build a fake document
#[derive(Debug, Clone)]
pub struct El {
    tag: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    rect: Option<(f64, f64, f64, f64)>,
    value: String,
    children: Vec<El>,
}

pub fn el(tag: &str) -> El {
    El {
        tag: tag.to_string(),
        attrs: Vec::new(),
        text: None,
        rect: None,
        value: String::new(),
        children: Vec::new(),
    }
}

impl El {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Some((x, y, width, height));
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn child(mut self, child: El) -> Self {
        self.children.push(child);
        self
    }
}

/// A flattened document with geometry and live form values
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub nodes: Vec<Value>,
    /// backend id -> (x, y, width, height)
    pub boxes: HashMap<i64, (f64, f64, f64, f64)>,
    pub values: HashMap<i64, String>,
    pub texts: HashMap<i64, String>,
    pub tags: HashMap<i64, String>,
}

/// Backend ids are node ids offset by this much
pub const BACKEND_OFFSET: i64 = 100;

impl FakePage {
    pub fn from_root(root: El) -> Self {
        let mut page = FakePage::default();
        page.nodes.push(json!({
            "nodeId": 1,
            "backendNodeId": 1 + BACKEND_OFFSET,
            "nodeType": 9,
            "nodeName": "#document",
            "localName": "",
            "nodeValue": "",
        }));
        let mut next = 2;
        page.flatten(&root, 1, &mut next);
        page
    }

    fn flatten(&mut self, el: &El, parent: i64, next: &mut i64) -> String {
        let node_id = *next;
        *next += 1;
        let backend = node_id + BACKEND_OFFSET;

        let attributes: Vec<&str> = el
            .attrs
            .iter()
            .flat_map(|(k, v)| [k.as_str(), v.as_str()])
            .collect();
        self.nodes.push(json!({
            "nodeId": node_id,
            "parentId": parent,
            "backendNodeId": backend,
            "nodeType": 1,
            "nodeName": el.tag.to_uppercase(),
            "localName": el.tag,
            "nodeValue": "",
            "attributes": attributes,
        }));
        if let Some(rect) = el.rect {
            self.boxes.insert(backend, rect);
        }
        self.tags.insert(backend, el.tag.clone());
        self.values.insert(backend, el.value.clone());

        let mut inner = String::new();
        if let Some(text) = &el.text {
            let text_id = *next;
            *next += 1;
            self.nodes.push(json!({
                "nodeId": text_id,
                "parentId": node_id,
                "backendNodeId": text_id + BACKEND_OFFSET,
                "nodeType": 3,
                "nodeName": "#text",
                "localName": "",
                "nodeValue": text,
            }));
            inner.push_str(text);
        }
        for child in &el.children {
            let child_text = self.flatten(child, node_id, next);
            if !child_text.is_empty() {
                if !inner.is_empty() {
                    inner.push(' ');
                }
                inner.push_str(&child_text);
            }
        }
        self.texts.insert(backend, inner.clone());
        inner
    }

    /// Backend id of the first element with `name=value`
    pub fn backend_with(&self, name: &str, value: &str) -> Option<i64> {
        self.nodes.iter().find_map(|n| {
            let attrs = n["attributes"].as_array()?;
            let hit = attrs
                .chunks(2)
                .any(|p| p.len() == 2 && p[0] == name && p[1] == value);
            hit.then(|| n["backendNodeId"].as_i64()).flatten()
        })
    }
}

/// Search engine landing page.
///
/// Retained handles in order: html=1, body=2, header=3, nav=4, a=5,
/// form=6, input=7, button=8, p=9. The footer is below the fold, the
/// script is skipped and the spacer div carries nothing.
pub fn search_page() -> FakePage {
    FakePage::from_root(
        el("html").at(0.0, 0.0, 800.0, 3000.0).child(
            el("body")
                .at(0.0, 0.0, 800.0, 3000.0)
                .child(
                    el("header").at(0.0, 0.0, 800.0, 60.0).child(
                        el("nav").at(0.0, 0.0, 400.0, 60.0).child(
                            el("a")
                                .attr("href", "/")
                                .text("Home")
                                .at(10.0, 10.0, 60.0, 20.0),
                        ),
                    ),
                )
                .child(el("script").text("var tracking = 1;"))
                .child(el("div").attr("class", "spacer").at(0.0, 60.0, 800.0, 20.0))
                .child(
                    el("form")
                        .attr("action", "/search")
                        .at(100.0, 100.0, 600.0, 40.0)
                        .child(
                            el("input")
                                .attr("name", "q")
                                .attr("type", "text")
                                .attr("placeholder", "Search")
                                .at(100.0, 100.0, 500.0, 40.0),
                        )
                        .child(el("button").text("Go").at(600.0, 100.0, 100.0, 40.0)),
                )
                .child(
                    el("p")
                        .attr("id", "intro")
                        .text("Find   licenses\n and more")
                        .at(100.0, 200.0, 600.0, 40.0),
                )
                .child(
                    el("footer").at(0.0, 2900.0, 800.0, 100.0).child(
                        el("button")
                            .text("Hidden")
                            .at(10.0, 2910.0, 80.0, 20.0),
                    ),
                ),
        ),
    )
}

/// Results page shown after submitting the search form
pub fn results_page() -> FakePage {
    FakePage::from_root(
        el("html").at(0.0, 0.0, 800.0, 600.0).child(
            el("body").at(0.0, 0.0, 800.0, 600.0).child(
                el("h1")
                    .text("Results for open source license")
                    .at(0.0, 0.0, 800.0, 40.0),
            ),
        ),
    )
}

// ---------------------------------------------------------------------------
// Fake DevTools endpoint
// ---------------------------------------------------------------------------

/// One command as seen on the wire
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub params: Value,
    pub session: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeTarget {
    id: String,
    url: String,
    title: String,
    page: FakePage,
    /// Bumped whenever a new document commits
    loader: u32,
    /// Navigation in flight: destination and frame-tree polls left before it commits
    pending: Option<(String, String, FakePage, u32)>,
}

impl FakeTarget {
    fn new(id: &str, url: &str, title: &str, page: FakePage) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            page,
            loader: 1,
            pending: None,
        }
    }

    /// Start a navigation, committing at once unless a delay is configured
    fn begin_navigation(&mut self, url: String, title: String, page: FakePage, delay: u32) {
        if delay == 0 {
            self.commit(url, title, page);
        } else {
            self.pending = Some((url, title, page, delay));
        }
    }

    fn commit(&mut self, url: String, title: String, page: FakePage) {
        self.url = url;
        self.title = title;
        self.page = page;
        self.loader += 1;
    }

    fn loader_id(&self) -> String {
        format!("L{}", self.loader)
    }
}

#[derive(Default)]
struct BrowserState {
    targets: Vec<FakeTarget>,
    calls: Vec<Call>,
    sessions: HashMap<String, String>,
    next_session: u32,
    next_target: u32,
    focused: Option<i64>,
    failing: HashSet<String>,
    /// Url and page loaded when Enter is pressed
    on_enter: Option<(String, String, FakePage)>,
    /// Frame-tree polls a navigation takes to commit
    commit_delay: u32,
}

/// Scripted DevTools endpoint
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeBrowser {
    /// Browser with no targets
    pub fn empty() -> Self {
        Self::default()
    }

    /// Browser with one page target
    pub fn with_page(url: &str, title: &str, page: FakePage) -> Self {
        let browser = Self::default();
        browser.add_target("T1", url, title, page);
        browser
    }

    pub fn add_target(&self, id: &str, url: &str, title: &str, page: FakePage) {
        self.lock().targets.push(FakeTarget::new(id, url, title, page));
    }

    /// Keep the old document, still reporting `complete`, for `polls`
    /// frame-tree queries after a navigation starts
    pub fn commit_after(&self, polls: u32) {
        self.lock().commit_delay = polls;
    }

    /// Swap in `page` at `url` when Enter is pressed
    pub fn on_enter(&self, url: &str, title: &str, page: FakePage) {
        self.lock().on_enter = Some((url.to_string(), title.to_string(), page));
    }

    /// Make every call to `method` fail with a protocol error
    pub fn fail(&self, method: &str) {
        self.lock().failing.insert(method.to_string());
    }

    pub fn heal(&self, method: &str) {
        self.lock().failing.remove(method);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Sessions not yet detached
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn url(&self, target_id: &str) -> Option<String> {
        self.lock()
            .targets
            .iter()
            .find(|t| t.id == target_id)
            .map(|t| t.url.clone())
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.lock().targets.iter().map(|t| t.id.clone()).collect()
    }

    /// Live value of a form control on the first target
    pub fn value_of(&self, backend_node_id: i64) -> Option<String> {
        let state = self.lock();
        state
            .targets
            .first()
            .and_then(|t| t.page.values.get(&backend_node_id).cloned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap()
    }

    fn handle(
        state: &mut BrowserState,
        method: &str,
        params: &Value,
        session: Option<&str>,
    ) -> std::result::Result<Value, CdpError> {
        let protocol = |message: &str| CdpError::Protocol {
            method: method.to_string(),
            code: -32000,
            message: message.to_string(),
        };

        if state.failing.contains(method) {
            return Err(protocol("injected failure"));
        }

        // Browser-level commands
        match method {
            "Target.getTargets" => {
                let infos: Vec<Value> = state
                    .targets
                    .iter()
                    .map(|t| json!({"targetId": t.id, "type": "page", "url": t.url, "title": t.title}))
                    .chain(std::iter::once(json!({
                        "targetId": "SW1", "type": "service_worker", "url": "https://sw.test/", "title": ""
                    })))
                    .collect();
                return Ok(json!({ "targetInfos": infos }));
            }
            "Target.attachToTarget" => {
                let target_id = params["targetId"].as_str().unwrap_or_default();
                if !state.targets.iter().any(|t| t.id == target_id) {
                    return Err(protocol("No target with given id found"));
                }
                state.next_session += 1;
                let session_id = format!("S{}", state.next_session);
                state
                    .sessions
                    .insert(session_id.clone(), target_id.to_string());
                return Ok(json!({ "sessionId": session_id }));
            }
            "Target.detachFromTarget" => {
                let session_id = params["sessionId"].as_str().unwrap_or_default();
                return match state.sessions.remove(session_id) {
                    Some(_) => Ok(json!({})),
                    None => Err(protocol("No session with given id")),
                };
            }
            "Target.getTargetInfo" => {
                let target_id = params["targetId"].as_str().unwrap_or_default();
                return state
                    .targets
                    .iter()
                    .find(|t| t.id == target_id)
                    .map(|t| {
                        json!({"targetInfo": {"targetId": t.id, "type": "page", "url": t.url, "title": t.title}})
                    })
                    .ok_or_else(|| protocol("No target with given id found"));
            }
            "Target.createTarget" => {
                state.next_target += 1;
                let id = format!("NEW{}", state.next_target);
                let url = params["url"].as_str().unwrap_or("about:blank").to_string();
                state
                    .targets
                    .push(FakeTarget::new(&id, &url, "New Tab", results_page()));
                return Ok(json!({ "targetId": id }));
            }
            "Target.closeTarget" => {
                let target_id = params["targetId"].as_str().unwrap_or_default();
                let before = state.targets.len();
                state.targets.retain(|t| t.id != target_id);
                return Ok(json!({ "success": state.targets.len() < before }));
            }
            _ => {}
        }

        // Session-scoped commands
        let target_id = session
            .and_then(|s| state.sessions.get(s))
            .cloned()
            .ok_or_else(|| protocol("Session with given id not found"))?;
        let focused = state.focused;
        let on_enter = state.on_enter.clone();
        let commit_delay = state.commit_delay;
        let target = state
            .targets
            .iter_mut()
            .find(|t| t.id == target_id)
            .ok_or_else(|| protocol("Target closed"))?;
        let backend = params["backendNodeId"].as_i64();

        let result = match method {
            "DOM.enable" | "Page.enable" | "Runtime.enable" => json!({}),
            "Page.getLayoutMetrics" => json!({
                "layoutViewport": {"pageX": 0, "pageY": 0, "clientWidth": 800, "clientHeight": 600},
                "cssLayoutViewport": {"pageX": 0, "pageY": 0, "clientWidth": 800, "clientHeight": 600},
                "cssContentSize": {"x": 0, "y": 0, "width": 800, "height": 3000}
            }),
            "DOM.getFlattenedDocument" => json!({ "nodes": target.page.nodes }),
            "DOM.getBoxModel" => {
                let (x, y, w, h) = backend
                    .and_then(|b| target.page.boxes.get(&b).copied())
                    .ok_or_else(|| protocol("Could not compute box model."))?;
                let quad = json!([x, y, x + w, y, x + w, y + h, x, y + h]);
                json!({ "model": { "border": quad, "content": quad, "width": w, "height": h } })
            }
            "DOM.scrollIntoViewIfNeeded" | "DOM.focus" | "DOM.resolveNode" => {
                let b = backend
                    .filter(|b| target.page.tags.contains_key(b))
                    .ok_or_else(|| protocol("No node with given id found"))?;
                if method == "DOM.resolveNode" {
                    json!({ "object": { "objectId": format!("node-{}", b) } })
                } else {
                    json!({})
                }
            }
            "Runtime.callFunctionOn" => {
                let b = params["objectId"]
                    .as_str()
                    .and_then(|o| o.strip_prefix("node-"))
                    .and_then(|b| b.parse::<i64>().ok())
                    .ok_or_else(|| protocol("Could not find object with given id"))?;
                let declaration = params["functionDeclaration"].as_str().unwrap_or_default();
                if declaration.contains("this.value") {
                    let value = target.page.values.get(&b).cloned().unwrap_or_default();
                    json!({ "result": { "type": "string", "value": value } })
                } else if declaration.contains("innerText") {
                    let text = target.page.texts.get(&b).cloned().unwrap_or_default();
                    json!({ "result": { "type": "string", "value": text } })
                } else {
                    json!({ "result": { "type": "undefined" } })
                }
            }
            "Input.dispatchMouseEvent" => json!({}),
            "Input.insertText" => {
                if let Some(b) = focused {
                    let text = params["text"].as_str().unwrap_or_default();
                    target.page.values.entry(b).or_default().push_str(text);
                }
                json!({})
            }
            "Input.dispatchKeyEvent" => {
                let key_down = params["type"] == "keyDown";
                let commands = params["commands"].as_array().cloned().unwrap_or_default();
                if key_down && commands.iter().any(|c| c == "deleteBackward") {
                    if let Some(b) = focused {
                        target.page.values.insert(b, String::new());
                    }
                }
                if key_down && params["key"] == "Enter" {
                    if let Some((url, title, page)) = on_enter {
                        target.begin_navigation(url, title, page, commit_delay);
                    }
                }
                json!({})
            }
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or_default();
                if url.contains("unreachable") {
                    json!({ "frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED" })
                } else {
                    let loader_id = format!("L{}", target.loader + 1);
                    let page = target.page.clone();
                    target.begin_navigation(
                        url.to_string(),
                        "Navigated".to_string(),
                        page,
                        commit_delay,
                    );
                    json!({ "frameId": "F1", "loaderId": loader_id })
                }
            }
            "Page.getFrameTree" => {
                if let Some((url, title, page, polls)) = target.pending.take() {
                    if polls <= 1 {
                        target.commit(url, title, page);
                    } else {
                        target.pending = Some((url, title, page, polls - 1));
                    }
                }
                json!({ "frameTree": { "frame": { "id": "F1", "loaderId": target.loader_id(), "url": target.url } } })
            }
            "Runtime.evaluate" => json!({ "result": { "type": "string", "value": "complete" } }),
            _ => return Err(protocol(&format!("'{}' wasn't found", method))),
        };

        if method == "DOM.focus" {
            state.focused = backend;
        }
        Ok(result)
    }
}

#[async_trait]
impl CdpTransport for FakeBrowser {
    async fn send(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> std::result::Result<Value, CdpError> {
        let mut state = self.lock();
        state.calls.push(Call {
            method: method.to_string(),
            params: params.clone(),
            session: session.map(str::to_string),
        });
        Self::handle(&mut state, method, &params, session)
    }
}

// ---------------------------------------------------------------------------
// Scripted oracles
// ---------------------------------------------------------------------------

/// What the instruction oracle was shown
#[derive(Debug, Clone)]
pub struct Seen {
    pub generation: u64,
    pub url: String,
    pub history_len: usize,
    pub focus: Option<String>,
    pub plan_name: String,
}

/// Hands out queued instructions, then `completed`
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<Instruction>>>,
    seen: Mutex<Vec<Seen>>,
    /// Cancelled when the given call (1-based) is answered
    stop_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedOracle {
    pub fn new(steps: Vec<Instruction>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn push_error(&self, error: PilotError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn push(&self, instruction: Instruction) {
        self.script.lock().unwrap().push_back(Ok(instruction));
    }

    /// Raise `stop` while answering call number `call`
    pub fn stop_at(&self, call: usize, stop: CancellationToken) {
        *self.stop_at.lock().unwrap() = Some((call, stop));
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl InstructionOracle for ScriptedOracle {
    async fn next_instruction(&self, request: &InstructionRequest<'_>) -> Result<Instruction> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(Seen {
                generation: request.snapshot.generation,
                url: request.snapshot.url.clone(),
                history_len: request.history.len(),
                focus: request.focus.map(str::to_string),
                plan_name: request.plan.name.clone(),
            });
            seen.len()
        };
        if let Some((at, stop)) = self.stop_at.lock().unwrap().as_ref() {
            if *at == call {
                stop.cancel();
            }
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Instruction::completed()))
    }
}

/// Hands out queued verdicts, then fails
#[derive(Default)]
pub struct ScriptedDiagnosis {
    script: Mutex<VecDeque<SupervisorVerdict>>,
    failures: Mutex<Vec<String>>,
}

impl ScriptedDiagnosis {
    pub fn new(verdicts: Vec<SupervisorVerdict>) -> Self {
        Self {
            script: Mutex::new(verdicts.into()),
            ..Self::default()
        }
    }

    /// Errors of the records it was asked about
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagnosisOracle for ScriptedDiagnosis {
    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> Result<SupervisorVerdict> {
        self.failures
            .lock()
            .unwrap()
            .push(request.failing.result.error.clone().unwrap_or_default());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PilotError::oracle("diagnosis unavailable"))
    }
}

/// Fixed intent, plan and answer
pub struct ScriptedPlanner {
    pub intent: Intent,
    pub plan: TaskPlan,
    pub answer: String,
}

impl ScriptedPlanner {
    pub fn browsing(plan: TaskPlan) -> Self {
        Self {
            intent: Intent::from_labels(["browser_use"]),
            plan,
            answer: String::new(),
        }
    }

    pub fn answering(answer: &str) -> Self {
        Self {
            intent: Intent::from_labels(["general"]),
            plan: TaskPlan::single("unused", "unused", Vec::new()),
            answer: answer.to_string(),
        }
    }
}

#[async_trait]
impl TaskPlanner for ScriptedPlanner {
    async fn classify_intent(&self, _prompt: &str) -> Result<Intent> {
        Ok(self.intent.clone())
    }

    async fn build_plan(&self, _prompt: &str) -> Result<TaskPlan> {
        Ok(self.plan.clone())
    }

    async fn answer(&self, _prompt: &str) -> Result<String> {
        Ok(self.answer.clone())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Config tuned for tests: no settle delay, short waits
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agent.settle_ms = 0;
    config.agent.default_wait_ms = 10;
    config.browser.command_timeout_ms = 500;
    config
}

pub fn services(
    browser: &FakeBrowser,
    oracle: Arc<ScriptedOracle>,
    diagnosis: Arc<ScriptedDiagnosis>,
    planner: Arc<ScriptedPlanner>,
    config: &Config,
) -> Services {
    Services::with_oracles(
        Arc::new(browser.clone()),
        oracle,
        diagnosis,
        planner,
        config,
    )
}

/// Services with an empty planner
pub fn loop_services(
    browser: &FakeBrowser,
    oracle: Arc<ScriptedOracle>,
    diagnosis: Arc<ScriptedDiagnosis>,
    config: &Config,
) -> Services {
    let planner = Arc::new(ScriptedPlanner::answering(""));
    services(browser, oracle, diagnosis, planner, config)
}
