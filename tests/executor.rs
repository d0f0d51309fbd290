//! Action execution against the in-memory DevTools endpoint

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{el, results_page, search_page, test_config, Call, FakeBrowser, FakePage};
use webpilot::browser::{ActionExecutor, PageSensor, PageSnapshot, TargetTracker};
use webpilot::core::{ActionError, Instruction};

struct Rig {
    browser: FakeBrowser,
    sensor: PageSensor,
    executor: ActionExecutor,
}

fn rig(page: FakePage) -> Rig {
    let browser = FakeBrowser::with_page("https://search.test/", "Search", page);
    let config = test_config();
    let tracker = Arc::new(TargetTracker::new(Arc::new(browser.clone())));
    let sensor = PageSensor::new(Arc::clone(&tracker), config.browser.clone());
    let executor = ActionExecutor::new(
        tracker,
        config.browser.clone(),
        config.agent.default_wait(),
        sensor.generations(),
    );
    Rig {
        browser,
        sensor,
        executor,
    }
}

impl Rig {
    /// Snapshot with the call log cleared afterwards
    async fn snapshot(&self) -> PageSnapshot {
        let snapshot = self.sensor.capture().await.unwrap();
        self.browser.clear_calls();
        snapshot
    }
}

/// Calls that act on the page, ignoring session plumbing
fn page_calls(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter(|c| !c.method.starts_with("Target."))
        .map(|c| match c.method.as_str() {
            "Input.dispatchMouseEvent" | "Input.dispatchKeyEvent" => {
                format!("{}:{}", c.method, c.params["type"].as_str().unwrap_or(""))
            }
            _ => c.method.clone(),
        })
        .collect()
}

#[tokio::test]
async fn test_unknown_handle_has_no_side_effect() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let err = rig
        .executor
        .execute(&Instruction::click("999"), &snapshot)
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::TargetMissing(ref t) if t == "999"));
    assert_eq!(rig.browser.count("Input.dispatchMouseEvent"), 0);
    assert_eq!(rig.browser.count("Target.attachToTarget"), 0);
}

#[tokio::test]
async fn test_non_numeric_handle_is_invalid() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let err = rig
        .executor
        .execute(&Instruction::click("#submit"), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::TargetInvalid { .. }));
    assert!(rig.browser.calls().is_empty());
}

#[tokio::test]
async fn test_click_dispatches_press_release_at_center() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let result = rig
        .executor
        .execute(&Instruction::click("8"), &snapshot)
        .await
        .unwrap();
    assert_eq!(result.action, "click");

    let calls = rig.browser.calls();
    assert_eq!(
        page_calls(&calls),
        vec![
            "DOM.scrollIntoViewIfNeeded",
            "DOM.getBoxModel",
            "Input.dispatchMouseEvent:mousePressed",
            "Input.dispatchMouseEvent:mouseReleased",
        ]
    );

    // Button is at (600, 100) sized 100x40
    for press in rig.browser.calls_to("Input.dispatchMouseEvent") {
        assert_eq!(press.params["x"], 650.0);
        assert_eq!(press.params["y"], 120.0);
        assert_eq!(press.params["button"], "left");
        assert_eq!(press.params["clickCount"], 1);
        assert!(press.session.is_some());
    }
    assert_eq!(rig.browser.open_sessions(), 0);
}

#[tokio::test]
async fn test_input_replaces_existing_value() {
    let page = FakePage::from_root(
        el("html").at(0.0, 0.0, 800.0, 600.0).child(
            el("body").at(0.0, 0.0, 800.0, 600.0).child(
                el("input")
                    .attr("name", "email")
                    .value("stale@example.com")
                    .at(10.0, 10.0, 300.0, 30.0),
            ),
        ),
    );
    let backend = page.backend_with("name", "email").unwrap();
    let rig = rig(page);
    let snapshot = rig.snapshot().await;

    rig.executor
        .execute(&Instruction::input("3", "new@example.com"), &snapshot)
        .await
        .unwrap();

    assert_eq!(rig.browser.value_of(backend).as_deref(), Some("new@example.com"));
    let calls = rig.browser.calls();
    assert_eq!(
        page_calls(&calls),
        vec![
            "DOM.scrollIntoViewIfNeeded",
            "DOM.focus",
            "Input.dispatchKeyEvent:keyDown",
            "Input.dispatchKeyEvent:keyUp",
            "Input.dispatchKeyEvent:keyDown",
            "Input.dispatchKeyEvent:keyUp",
            "Input.insertText",
            "DOM.resolveNode",
            "Runtime.callFunctionOn",
        ]
    );
    assert_eq!(rig.browser.count("Input.dispatchMouseEvent"), 0);
}

#[tokio::test]
async fn test_search_types_and_submits() {
    let rig = rig(search_page());
    rig.browser
        .on_enter("https://search.test/?q=open+source+license", "Results", results_page());
    let snapshot = rig.snapshot().await;

    let result = rig
        .executor
        .execute(&Instruction::search("7", "open source license"), &snapshot)
        .await
        .unwrap();
    assert_eq!(result.data.unwrap()["query"], "open source license");

    let inserted = rig.browser.calls_to("Input.insertText");
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].params["text"], "open source license");

    let enter: Vec<Call> = rig
        .browser
        .calls_to("Input.dispatchKeyEvent")
        .into_iter()
        .filter(|c| c.params["key"] == "Enter")
        .collect();
    assert_eq!(enter.len(), 2);
    assert_eq!(enter[0].params["type"], "keyDown");
    assert_eq!(enter[0].params["text"], "\r");
    assert_eq!(enter[1].params["type"], "keyUp");
    assert!(enter[1].params.get("text").is_none());

    assert_eq!(
        rig.browser.url("T1").as_deref(),
        Some("https://search.test/?q=open+source+license")
    );
    assert!(rig.browser.count("Runtime.evaluate") >= 1);
}

#[tokio::test]
async fn test_navigate_without_url() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let err = rig
        .executor
        .execute(&Instruction::navigate("  "), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::NavigationMissingUrl));
    assert!(rig.browser.calls().is_empty());

    let err = rig
        .executor
        .execute(&Instruction::navigate("not a url"), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidUrl(_)));
}

#[tokio::test]
async fn test_navigate_loads_url() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let result = rig
        .executor
        .execute(&Instruction::navigate("https://example.com/docs"), &snapshot)
        .await
        .unwrap();

    assert_eq!(result.data.unwrap()["url"], "https://example.com/docs");
    assert_eq!(rig.browser.url("T1").as_deref(), Some("https://example.com/docs"));
    assert_eq!(rig.browser.open_sessions(), 0);
}

#[tokio::test]
async fn test_navigate_error_text_is_failure() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let err = rig
        .executor
        .execute(&Instruction::navigate("https://unreachable.test/"), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Protocol(ref m) if m.contains("ERR_NAME_NOT_RESOLVED")));
    assert_eq!(rig.browser.open_sessions(), 0);
}

#[tokio::test]
async fn test_extract_reads_text_and_values() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let result = rig
        .executor
        .execute(&Instruction::extract("9"), &snapshot)
        .await
        .unwrap();
    let data = result.data.unwrap();
    assert_eq!(data["target"], "9");
    assert_eq!(data["text"], "Find licenses and more");

    // Form controls report their value
    let result = rig
        .executor
        .execute(&Instruction::extract("7"), &snapshot)
        .await
        .unwrap();
    assert_eq!(result.data.unwrap()["text"], "");
    let reads = rig.browser.calls_to("Runtime.callFunctionOn");
    assert!(reads[1].params["functionDeclaration"]
        .as_str()
        .unwrap()
        .contains("this.value"));
}

#[tokio::test]
async fn test_stale_handle_is_rejected() {
    let rig = rig(search_page());
    let old = rig.snapshot().await;
    let _newer = rig.snapshot().await;

    let err = rig
        .executor
        .execute(&Instruction::click("8"), &old)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::TargetInvalid { ref reason, .. } if reason.contains("snapshot")));
    assert_eq!(rig.browser.count("Input.dispatchMouseEvent"), 0);
}

#[tokio::test]
async fn test_detached_node_is_invalid_target() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;
    rig.browser.fail("DOM.scrollIntoViewIfNeeded");

    let err = rig
        .executor
        .execute(&Instruction::click("8"), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::TargetInvalid { .. }));
    assert_eq!(rig.browser.open_sessions(), 0);
}

#[tokio::test]
async fn test_wait_and_completed_touch_nothing() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let result = rig
        .executor
        .execute(&Instruction::wait_ms(5), &snapshot)
        .await
        .unwrap();
    assert_eq!(result.data.unwrap()["waitedMs"], 5);

    let result = rig
        .executor
        .execute(&Instruction::completed(), &snapshot)
        .await
        .unwrap();
    assert_eq!(result.action, "completed");
    assert!(rig.browser.calls().is_empty());
}

#[tokio::test]
async fn test_wait_without_duration_uses_default() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;
    let wait = Instruction {
        action: Some("wait".to_string()),
        ..Instruction::default()
    };

    let started = std::time::Instant::now();
    rig.executor.execute(&wait, &snapshot).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(test_config().agent.default_wait_ms));
}

#[tokio::test]
async fn test_scroll_sends_page_keys() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    rig.executor
        .execute(&Instruction::scroll_down(), &snapshot)
        .await
        .unwrap();
    rig.executor
        .execute(&Instruction::scroll_up(), &snapshot)
        .await
        .unwrap();

    let keys: Vec<String> = rig
        .browser
        .calls_to("Input.dispatchKeyEvent")
        .iter()
        .filter(|c| c.params["type"] == "keyDown")
        .map(|c| c.params["key"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(keys, vec!["PageDown", "PageUp"]);
}

#[tokio::test]
async fn test_unsupported_action() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;
    let hover: Instruction =
        serde_json::from_value(serde_json::json!({"action": "hover", "target": 8})).unwrap();

    let err = rig.executor.execute(&hover, &snapshot).await.unwrap_err();
    assert!(matches!(err, ActionError::UnsupportedAction(ref a) if a == "hover"));

    let err = rig
        .executor
        .execute(&Instruction::click(""), &snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::MissingRequiredField { ref field, .. } if field == "target"));
    assert!(rig.browser.calls().is_empty());
}

#[tokio::test]
async fn test_search_waits_for_new_document() {
    let rig = rig(search_page());
    rig.browser
        .on_enter("https://search.test/?q=open+source+license", "Results", results_page());
    rig.browser.commit_after(3);
    let snapshot = rig.snapshot().await;

    rig.executor
        .execute(&Instruction::search("7", "open source license"), &snapshot)
        .await
        .unwrap();

    // The old document answered `complete` throughout; the commit is what ended the wait
    assert_eq!(
        rig.browser.url("T1").as_deref(),
        Some("https://search.test/?q=open+source+license")
    );
    assert!(rig.browser.count("Page.getFrameTree") >= 4);

    let after = rig.sensor.capture().await.unwrap();
    assert_ne!(after.url, snapshot.url);
    assert_eq!(after.title, "Results");
}

#[tokio::test]
async fn test_search_without_navigation_gives_up_waiting() {
    let rig = rig(search_page());
    let snapshot = rig.snapshot().await;

    let started = std::time::Instant::now();
    rig.executor
        .execute(&Instruction::search("7", "in-page filter"), &snapshot)
        .await
        .unwrap();

    // Bounded by the command timeout of the test config
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(rig.browser.url("T1").as_deref(), Some("https://search.test/"));
}

#[tokio::test]
async fn test_navigate_waits_for_its_loader() {
    let rig = rig(search_page());
    rig.browser.commit_after(2);
    let snapshot = rig.snapshot().await;

    rig.executor
        .execute(&Instruction::navigate("https://example.com/docs"), &snapshot)
        .await
        .unwrap();

    assert_eq!(rig.browser.url("T1").as_deref(), Some("https://example.com/docs"));
    assert!(rig.browser.count("Page.getFrameTree") >= 2);
    let after = rig.sensor.capture().await.unwrap();
    assert_eq!(after.url, "https://example.com/docs");
}
