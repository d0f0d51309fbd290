//! Bridge module - typed request/response channel to the agent
//!
//! A [`BridgeClient`] sends [`BridgeRequest`]s to a [`BridgeHost`] over an
//! mpsc queue; each request carries its own oneshot reply slot and the
//! client waits for it with an explicit deadline.

pub mod host;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::core::{Instruction, PilotError, Result};

pub use host::BridgeHost;

/// Messages understood by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    /// Capture a snapshot; its handles become addressable by `ExecuteAction`
    GetPageInfo,
    /// Run a prompt end to end
    ExecSmartTask { prompt: String },
    /// Execute one instruction against the last `GetPageInfo` snapshot
    ExecuteAction { instruction: Instruction },
    /// Raise the stop signal of the running smart task
    StopExecution,
    /// Liveness probe, answered with `PONG`
    Ping,
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeReply {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Turn an error envelope into a `Bridge` error
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(PilotError::bridge(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }
}

/// A request in flight together with its reply slot
pub(crate) struct Envelope {
    pub request: BridgeRequest,
    pub reply: oneshot::Sender<BridgeReply>,
}

/// Cloneable sending side
#[derive(Clone)]
pub struct BridgeClient {
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl BridgeClient {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Send with the default deadline
    pub async fn request(&self, request: BridgeRequest) -> Result<BridgeReply> {
        self.request_with_timeout(request, self.timeout).await
    }

    /// Send and wait at most `timeout` for the single reply
    pub async fn request_with_timeout(
        &self,
        request: BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| PilotError::bridge("host is not running"))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(PilotError::bridge("host dropped the request")),
            Err(_) => Err(PilotError::bridge(format!(
                "no reply within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// `PING` -> `PONG`
    pub async fn ping(&self) -> Result<bool> {
        let reply = self.request(BridgeRequest::Ping).await?;
        Ok(reply.ok && reply.data.as_ref().and_then(Value::as_str) == Some("PONG"))
    }

    pub async fn page_info(&self) -> Result<Value> {
        self.request(BridgeRequest::GetPageInfo).await?.into_result()
    }

    pub async fn execute_action(&self, instruction: Instruction) -> Result<Value> {
        self.request(BridgeRequest::ExecuteAction { instruction })
            .await?
            .into_result()
    }

    /// Run a prompt; the reply arrives when the task ends
    pub async fn exec_smart_task(
        &self,
        prompt: impl Into<String>,
        timeout: Duration,
    ) -> Result<Value> {
        self.request_with_timeout(
            BridgeRequest::ExecSmartTask {
                prompt: prompt.into(),
            },
            timeout,
        )
        .await?
        .into_result()
    }

    pub async fn stop(&self) -> Result<Value> {
        self.request(BridgeRequest::StopExecution)
            .await?
            .into_result()
    }
}
