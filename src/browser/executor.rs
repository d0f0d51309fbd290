//! Action execution over CDP
//!
//! Every element-addressed action goes through the snapshot's handle table:
//! the handle resolves to a backend node id, which is the only way elements
//! are addressed on the wire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::browser::sensor::quad_rect;
use crate::browser::snapshot::{truncate_chars, Generations, HandleEntry, PageSnapshot};
use crate::browser::target::{Attachment, TargetTracker};
use crate::core::config::BrowserConfig;
use crate::core::{Action, ActionError, ActionResult, CdpError, Instruction};

const NOTIFY_CHANGE: &str = "function() { \
    this.dispatchEvent(new Event('input', { bubbles: true })); \
    this.dispatchEvent(new Event('change', { bubbles: true })); }";
const READ_VALUE: &str = "function() { return this.value == null ? '' : String(this.value); }";
const READ_TEXT: &str = "function() { return this.innerText || this.textContent || ''; }";

const LOAD_POLL: Duration = Duration::from_millis(100);
/// How long a submitted form gets to start a new document
const SUBMIT_COMMIT_WINDOW: Duration = Duration::from_secs(2);

/// Keys dispatched as native key events
#[derive(Debug, Clone, Copy)]
enum Key {
    Enter,
    PageDown,
    PageUp,
}

impl Key {
    fn name(self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::PageDown => "PageDown",
            Key::PageUp => "PageUp",
        }
    }

    fn code(self) -> i64 {
        match self {
            Key::Enter => 13,
            Key::PageDown => 34,
            Key::PageUp => 33,
        }
    }
}

/// Executes instructions against the tracked target
pub struct ActionExecutor {
    tracker: Arc<TargetTracker>,
    config: BrowserConfig,
    default_wait: Duration,
    generations: Generations,
}

impl ActionExecutor {
    /// `generations` must be the sensor's counter so stale handles are caught
    pub fn new(
        tracker: Arc<TargetTracker>,
        config: BrowserConfig,
        default_wait: Duration,
        generations: Generations,
    ) -> Self {
        Self {
            tracker,
            config,
            default_wait,
            generations,
        }
    }

    /// Execute one instruction using handles from `snapshot`
    pub async fn execute(
        &self,
        instruction: &Instruction,
        snapshot: &PageSnapshot,
    ) -> Result<ActionResult, ActionError> {
        let action = instruction.to_action(self.default_wait)?;
        let kind = action.kind();
        info!("Executing {}", instruction.label());

        match &action {
            Action::Completed => return Ok(ActionResult::empty(kind.as_str())),
            Action::Wait { duration } => {
                tokio::time::sleep(*duration).await;
                return Ok(ActionResult::with_data(
                    kind.as_str(),
                    json!({ "waitedMs": duration.as_millis() as u64 }),
                ));
            }
            _ => {}
        }

        // Resolve the handle before touching the browser
        let entry = match &action {
            Action::Click { target }
            | Action::Input { target, .. }
            | Action::Search { target, .. }
            | Action::Extract { target } => {
                Some((target.as_str(), self.resolve(target, snapshot)?))
            }
            _ => None,
        };

        let session = self.attach().await?;
        let outcome = match (&action, entry) {
            (Action::Click { .. }, Some((target, entry))) => self
                .click(&session, target, entry)
                .await
                .map(|_| ActionResult::empty(kind.as_str())),
            (Action::Input { value, .. }, Some((target, entry))) => self
                .fill(&session, target, entry, value)
                .await
                .map(|_| ActionResult::empty(kind.as_str())),
            (Action::Search { value, .. }, Some((target, entry))) => {
                self.search(&session, target, entry, value).await.map(|_| {
                    ActionResult::with_data(kind.as_str(), json!({ "query": value }))
                })
            }
            (Action::Extract { .. }, Some((target, entry))) => self
                .extract(&session, target, entry)
                .await
                .map(|text| {
                    let data = json!({ "target": target, "text": text });
                    ActionResult::with_data(kind.as_str(), data)
                }),
            (Action::ScrollPageDown, _) => self
                .press(&session, Key::PageDown)
                .await
                .map(|_| ActionResult::empty(kind.as_str())),
            (Action::ScrollPageUp, _) => self
                .press(&session, Key::PageUp)
                .await
                .map(|_| ActionResult::empty(kind.as_str())),
            (Action::Navigate { url }, _) => self
                .navigate(&session, url.as_str())
                .await
                .map(|_| ActionResult::with_data(kind.as_str(), json!({ "url": url.as_str() }))),
            _ => Err(ActionError::UnsupportedAction(kind.as_str().to_string())),
        };
        session.detach().await;
        outcome
    }

    /// Map a handle string to its table entry
    fn resolve<'s>(
        &self,
        target: &str,
        snapshot: &'s PageSnapshot,
    ) -> Result<&'s HandleEntry, ActionError> {
        let handle: u32 = target.trim().parse().map_err(|_| ActionError::TargetInvalid {
            target: target.to_string(),
            reason: "not a snapshot handle".to_string(),
        })?;

        let entry = snapshot
            .handles
            .get(handle)
            .ok_or_else(|| ActionError::TargetMissing(target.to_string()))?;

        if snapshot.generation < self.generations.current() {
            return Err(ActionError::TargetInvalid {
                target: target.to_string(),
                reason: format!(
                    "handle belongs to snapshot #{} but #{} is current",
                    snapshot.generation,
                    self.generations.current()
                ),
            });
        }
        Ok(entry)
    }

    async fn attach(&self) -> Result<Attachment, ActionError> {
        let target_id = self
            .tracker
            .resolve_active()
            .await?
            .ok_or_else(|| ActionError::Protocol("no page target".to_string()))?;
        Ok(self.tracker.attach(&target_id).await?)
    }

    async fn click(
        &self,
        session: &Attachment,
        target: &str,
        entry: &HandleEntry,
    ) -> Result<(), ActionError> {
        let node = json!({ "backendNodeId": entry.backend_node_id });
        on_element(
            target,
            session.send("DOM.scrollIntoViewIfNeeded", node.clone()).await,
        )?;
        let model = on_element(target, session.send("DOM.getBoxModel", node).await)?;
        let rect = quad_rect(&model["model"]["border"]).ok_or_else(|| ActionError::TargetInvalid {
            target: target.to_string(),
            reason: "element has no box".to_string(),
        })?;

        let (x, y) = rect.center();
        debug!("Clicking handle {} at ({:.1}, {:.1})", target, x, y);
        for kind in ["mousePressed", "mouseReleased"] {
            session
                .send(
                    "Input.dispatchMouseEvent",
                    json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
                )
                .await?;
        }
        Ok(())
    }

    async fn fill(
        &self,
        session: &Attachment,
        target: &str,
        entry: &HandleEntry,
        value: &str,
    ) -> Result<(), ActionError> {
        let node = json!({ "backendNodeId": entry.backend_node_id });
        on_element(
            target,
            session.send("DOM.scrollIntoViewIfNeeded", node.clone()).await,
        )?;
        on_element(target, session.send("DOM.focus", node).await)?;

        // Clear through the editing commands so the page sees real edits
        self.key_pair(
            session,
            json!({ "key": "a", "code": "KeyA", "modifiers": 2, "commands": ["selectAll"] }),
        )
        .await?;
        self.key_pair(
            session,
            json!({
                "key": "Backspace",
                "code": "Backspace",
                "windowsVirtualKeyCode": 8,
                "commands": ["deleteBackward"]
            }),
        )
        .await?;

        if !value.is_empty() {
            session
                .send("Input.insertText", json!({ "text": value }))
                .await?;
        }

        let object_id = self.object_id(session, target, entry).await?;
        session
            .send(
                "Runtime.callFunctionOn",
                json!({ "objectId": object_id, "functionDeclaration": NOTIFY_CHANGE }),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        session: &Attachment,
        target: &str,
        entry: &HandleEntry,
        value: &str,
    ) -> Result<(), ActionError> {
        self.fill(session, target, entry, value).await?;
        let before = self.loader_id(session).await;
        self.press(session, Key::Enter).await?;

        // Enter may not navigate at all, so the wait for a new document is short
        let window = SUBMIT_COMMIT_WINDOW.min(self.config.command_timeout());
        self.wait_for_commit(session, Commit::ReplacedFrom(before), window)
            .await;
        self.wait_for_load(session).await;
        Ok(())
    }

    async fn extract(
        &self,
        session: &Attachment,
        target: &str,
        entry: &HandleEntry,
    ) -> Result<String, ActionError> {
        let object_id = self.object_id(session, target, entry).await?;
        let reader = if entry.is_form_control() {
            READ_VALUE
        } else {
            READ_TEXT
        };
        let params = json!({
            "objectId": object_id,
            "functionDeclaration": reader,
            "returnByValue": true,
        });
        let result = session.send("Runtime.callFunctionOn", params).await?;

        let raw = result["result"]["value"].as_str().unwrap_or_default();
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(truncate_chars(&normalized, self.config.extract_limit))
    }

    async fn navigate(&self, session: &Attachment, url: &str) -> Result<(), ActionError> {
        let result = session.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(ActionError::Protocol(format!(
                "navigation to {} failed: {}",
                url, error
            )));
        }
        // Same-document navigations report no loader
        if let Some(loader) = result["loaderId"].as_str().filter(|l| !l.is_empty()) {
            let commit = Commit::Loader(loader.to_string());
            self.wait_for_commit(session, commit, self.config.command_timeout())
                .await;
        }
        self.wait_for_load(session).await;
        Ok(())
    }

    async fn press(&self, session: &Attachment, key: Key) -> Result<(), ActionError> {
        let mut params = json!({
            "key": key.name(),
            "code": key.name(),
            "windowsVirtualKeyCode": key.code(),
            "nativeVirtualKeyCode": key.code(),
        });
        if let Key::Enter = key {
            params["text"] = Value::String("\r".to_string());
        }
        self.key_pair(session, params).await
    }

    /// keyDown followed by keyUp with the same key fields
    async fn key_pair(&self, session: &Attachment, params: Value) -> Result<(), ActionError> {
        let mut down = params.clone();
        down["type"] = json!("keyDown");
        session.send("Input.dispatchKeyEvent", down).await?;

        let mut up = params;
        up["type"] = json!("keyUp");
        if let Some(fields) = up.as_object_mut() {
            fields.remove("text");
            fields.remove("commands");
        }
        session.send("Input.dispatchKeyEvent", up).await?;
        Ok(())
    }

    async fn object_id(
        &self,
        session: &Attachment,
        target: &str,
        entry: &HandleEntry,
    ) -> Result<String, ActionError> {
        let resolved = on_element(
            target,
            session
                .send(
                    "DOM.resolveNode",
                    json!({ "backendNodeId": entry.backend_node_id }),
                )
                .await,
        )?;
        resolved["object"]["objectId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ActionError::TargetInvalid {
                target: target.to_string(),
                reason: "element did not resolve to a live object".to_string(),
            })
    }

    /// Poll `document.readyState` until complete or the command deadline
    /// Main-frame loader id, which changes whenever a new document commits
    async fn loader_id(&self, session: &Attachment) -> Option<String> {
        let tree = session.send("Page.getFrameTree", json!({})).await.ok()?;
        tree["frameTree"]["frame"]["loaderId"]
            .as_str()
            .map(str::to_string)
    }

    /// Poll until the new document has replaced the old one.
    ///
    /// The outgoing document keeps answering `readyState == "complete"`
    /// until the commit, so the load poll alone would return too early.
    async fn wait_for_commit(&self, session: &Attachment, commit: Commit, window: Duration) {
        let deadline = Instant::now() + window;
        loop {
            let current = self.loader_id(session).await;
            if commit.is_done(current.as_deref()) {
                return;
            }
            if Instant::now() >= deadline {
                debug!("No new document committed within {:?}", window);
                return;
            }
            tokio::time::sleep(LOAD_POLL).await;
        }
    }

    async fn wait_for_load(&self, session: &Attachment) {
        let deadline = Instant::now() + self.config.command_timeout();
        while Instant::now() < deadline {
            let state = session
                .send(
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await;
            // Evaluation can fail while the old context is torn down
            if let Ok(result) = state {
                if result["result"]["value"].as_str() == Some("complete") {
                    return;
                }
            }
            tokio::time::sleep(LOAD_POLL).await;
        }
        debug!("Page did not reach readyState=complete before the deadline");
    }
}

/// What counts as the navigation having committed
#[derive(Debug)]
enum Commit {
    /// The main frame runs this loader
    Loader(String),
    /// The main frame no longer runs this loader; unknown means nothing to wait for
    ReplacedFrom(Option<String>),
}

impl Commit {
    fn is_done(&self, current: Option<&str>) -> bool {
        match self {
            Commit::Loader(expected) => current == Some(expected.as_str()),
            Commit::ReplacedFrom(None) => true,
            Commit::ReplacedFrom(Some(before)) => current.is_some_and(|c| c != before),
        }
    }
}

/// Element-scoped commands fail when the node is gone or unusable
fn on_element(target: &str, result: Result<Value, CdpError>) -> Result<Value, ActionError> {
    result.map_err(|e| match e {
        CdpError::Protocol { message, .. } => ActionError::TargetInvalid {
            target: target.to_string(),
            reason: message,
        },
        other => ActionError::from(other),
    })
}
