//! Target tracking and scoped debugging sessions
//!
//! An [`Attachment`] is one `Target.attachToTarget` session. Callers release
//! it with [`Attachment::detach`]; if the owning future is dropped first the
//! `Drop` impl schedules the detach on the current runtime so the target is
//! never left attached.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::browser::cdp::CdpTransport;
use crate::core::CdpError;

/// Subset of `Target.TargetInfo`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl TargetInfo {
    fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

/// Tracks which page target the agent is driving
pub struct TargetTracker {
    transport: Arc<dyn CdpTransport>,
    current: Mutex<Option<String>>,
}

impl TargetTracker {
    pub fn new(transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            transport,
            current: Mutex::new(None),
        }
    }

    /// Shared transport
    pub fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    /// All page targets, in browser order
    pub async fn pages(&self) -> Result<Vec<TargetInfo>, CdpError> {
        let result = self
            .transport
            .send("Target.getTargets", json!({}), None)
            .await?;
        let infos: Vec<TargetInfo> =
            serde_json::from_value(result["targetInfos"].clone()).unwrap_or_default();
        Ok(infos.into_iter().filter(TargetInfo::is_page).collect())
    }

    /// The tracked target if it still exists, otherwise the first page.
    ///
    /// Returns `Ok(None)` when the browser has no page at all.
    pub async fn resolve_active(&self) -> Result<Option<String>, CdpError> {
        let pages = self.pages().await?;
        let mut current = self.current.lock().await;

        if let Some(id) = current.as_ref() {
            if pages.iter().any(|p| &p.target_id == id) {
                return Ok(Some(id.clone()));
            }
            debug!("Tracked target {} is gone", id);
        }

        *current = pages.first().map(|p| p.target_id.clone());
        Ok(current.clone())
    }

    /// Make `target_id` the tracked target
    pub async fn set_current(&self, target_id: impl Into<String>) {
        *self.current.lock().await = Some(target_id.into());
    }

    /// Forget the tracked target
    pub async fn clear(&self) {
        *self.current.lock().await = None;
    }

    /// Url and title of a target
    pub async fn info(&self, target_id: &str) -> Result<TargetInfo, CdpError> {
        let result = self
            .transport
            .send("Target.getTargetInfo", json!({ "targetId": target_id }), None)
            .await?;
        serde_json::from_value(result["targetInfo"].clone()).map_err(|e| CdpError::Protocol {
            method: "Target.getTargetInfo".to_string(),
            code: 0,
            message: e.to_string(),
        })
    }

    /// Open a flat session on `target_id`
    pub async fn attach(&self, target_id: &str) -> Result<Attachment, CdpError> {
        let result = self
            .transport
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;

        let session_id = result["sessionId"]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CdpError::Protocol {
                method: "Target.attachToTarget".to_string(),
                code: 0,
                message: "no sessionId in response".to_string(),
            })?
            .to_string();

        debug!("Attached to {} as {}", target_id, session_id);
        Ok(Attachment {
            transport: Arc::clone(&self.transport),
            target_id: target_id.to_string(),
            session_id,
            released: false,
        })
    }
}

/// A live debugging session on one target
pub struct Attachment {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
    session_id: String,
    released: bool,
}

impl Attachment {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a command on this session
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.transport
            .send(method, params, Some(&self.session_id))
            .await
    }

    /// Release the session
    pub async fn detach(mut self) {
        self.released = true;
        if let Err(e) = detach_session(&*self.transport, &self.session_id).await {
            warn!("Failed to detach session {}: {}", self.session_id, e);
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = detach_session(&*transport, &session_id).await {
                        warn!("Deferred detach of {} failed: {}", session_id, e);
                    }
                });
            }
            Err(_) => warn!("Session {} dropped outside a runtime", session_id),
        }
    }
}

async fn detach_session(transport: &dyn CdpTransport, session_id: &str) -> Result<(), CdpError> {
    transport
        .send(
            "Target.detachFromTarget",
            json!({ "sessionId": session_id }),
            None,
        )
        .await
        .map(|_| ())
}
