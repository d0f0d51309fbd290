//! Tab-level browser tools used by task plans

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;
use url::Url;

use crate::browser::target::TargetTracker;
use crate::core::plan::{BrowserTask, OPEN_TAB};
use crate::core::{PilotError, Result};

pub const CLOSE_TAB: &str = "close_tab";
pub const QUERY_TAB: &str = "query_tab";

/// Runs `open_tab`, `close_tab` and `query_tab`
pub struct TabTools {
    tracker: Arc<TargetTracker>,
}

impl TabTools {
    pub fn new(tracker: Arc<TargetTracker>) -> Self {
        Self { tracker }
    }

    /// Dispatch a plan's browser task
    pub async fn run(&self, task: &BrowserTask) -> Result<Value> {
        match task.tool_name.as_str() {
            OPEN_TAB => {
                let url = task
                    .param("url")
                    .ok_or_else(|| PilotError::browser("open_tab requires a url parameter"))?;
                self.open_tab(url).await
            }
            CLOSE_TAB => self.close_tab().await,
            QUERY_TAB => self.query_tab().await,
            other => Err(PilotError::browser(format!("unknown browser tool '{}'", other))),
        }
    }

    /// Open `url` in a new tab and start tracking it
    pub async fn open_tab(&self, url: &str) -> Result<Value> {
        let parsed = Url::parse(url)
            .map_err(|_| PilotError::browser(format!("'{}' is not an absolute url", url)))?;

        let result = self
            .tracker
            .transport()
            .send("Target.createTarget", json!({ "url": parsed.as_str() }), None)
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| PilotError::browser("Target.createTarget returned no targetId"))?
            .to_string();

        info!("Opened tab {} at {}", target_id, parsed);
        self.tracker.set_current(target_id.clone()).await;
        Ok(json!({ "targetId": target_id, "url": parsed.as_str() }))
    }

    /// Close the tracked tab; tracking falls back to the first remaining page
    pub async fn close_tab(&self) -> Result<Value> {
        let target_id = self.tracker.resolve_active().await?.ok_or(PilotError::NoTarget)?;
        self.tracker
            .transport()
            .send("Target.closeTarget", json!({ "targetId": target_id }), None)
            .await?;

        info!("Closed tab {}", target_id);
        self.tracker.clear().await;
        let next = self.tracker.resolve_active().await?;
        Ok(json!({ "closed": target_id, "current": next }))
    }

    /// Url and title of the tracked tab
    pub async fn query_tab(&self) -> Result<Value> {
        let target_id = self.tracker.resolve_active().await?.ok_or(PilotError::NoTarget)?;
        let info = self.tracker.info(&target_id).await?;
        Ok(json!({ "targetId": target_id, "url": info.url, "title": info.title }))
    }
}
