//! Serving side of the bridge
//!
//! Requests are handled one at a time in arrival order. A smart task runs
//! on its own tokio task so `PING` and `STOP_EXECUTION` stay responsive
//! while it works; its reply is sent when the run ends.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::TaskRunner;
use crate::bridge::{BridgeClient, BridgeReply, BridgeRequest, Envelope};
use crate::browser::PageSnapshot;
use crate::core::config::BridgeConfig;
use crate::core::Instruction;

struct ActiveTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct BridgeHost {
    runner: Arc<TaskRunner>,
    rx: mpsc::Receiver<Envelope>,
    last_snapshot: Option<Arc<PageSnapshot>>,
    active: Option<ActiveTask>,
}

impl BridgeHost {
    /// Create a connected client/host pair
    pub fn channel(runner: Arc<TaskRunner>, config: &BridgeConfig) -> (BridgeClient, Self) {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let client = BridgeClient::new(tx, config.request_timeout());
        let host = Self {
            runner,
            rx,
            last_snapshot: None,
            active: None,
        };
        (client, host)
    }

    /// Serve until every client is dropped
    pub async fn serve(mut self) {
        info!("Bridge host started");
        while let Some(Envelope { request, reply }) = self.rx.recv().await {
            debug!("Bridge request: {:?}", request);
            self.handle(request, reply).await;
        }
        if let Some(active) = self.active.take() {
            active.stop.cancel();
        }
        info!("Bridge host stopped");
    }

    async fn handle(&mut self, request: BridgeRequest, reply: oneshot::Sender<BridgeReply>) {
        let response = match request {
            BridgeRequest::Ping => BridgeReply::ok(json!("PONG")),
            BridgeRequest::GetPageInfo => self.page_info().await,
            BridgeRequest::ExecuteAction { instruction } => {
                self.execute_action(&instruction).await
            }
            BridgeRequest::StopExecution => self.stop_execution(),
            BridgeRequest::ExecSmartTask { prompt } => {
                // The spawned task owns the reply slot
                return self.start_smart_task(prompt, reply);
            }
        };
        // The client may have timed out and gone away
        let _ = reply.send(response);
    }

    fn task_running(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveTask::is_running)
    }

    async fn page_info(&mut self) -> BridgeReply {
        // A capture would advance the snapshot generation under the running task
        if self.task_running() {
            return BridgeReply::err("a task is running; page info is unavailable until it ends");
        }
        match self.runner.services().sensor.capture().await {
            Ok(snapshot) => {
                let data = encode(&snapshot);
                self.last_snapshot = Some(Arc::new(snapshot));
                data
            }
            Err(e) => BridgeReply::err(e.to_string()),
        }
    }

    async fn execute_action(&self, instruction: &Instruction) -> BridgeReply {
        if self.task_running() {
            return BridgeReply::err("a task is running; stop it before executing actions");
        }
        let Some(snapshot) = self.last_snapshot.as_deref() else {
            return BridgeReply::err("no page info captured; send GET_PAGE_INFO first");
        };
        match self
            .runner
            .services()
            .executor
            .execute(instruction, snapshot)
            .await
        {
            Ok(result) => encode(&result),
            Err(e) => BridgeReply::err(e.to_string()),
        }
    }

    fn stop_execution(&mut self) -> BridgeReply {
        match self.active.as_ref().filter(|a| a.is_running()) {
            Some(active) => {
                info!("Stop requested");
                active.stop.cancel();
                BridgeReply::ok(json!({ "stopping": true }))
            }
            None => BridgeReply::ok(json!({ "stopping": false })),
        }
    }

    fn start_smart_task(&mut self, prompt: String, reply: oneshot::Sender<BridgeReply>) {
        if self.task_running() {
            warn!("Rejected smart task while another is running");
            let _ = reply.send(BridgeReply::err("a task is already running"));
            return;
        }

        let stop = CancellationToken::new();
        let runner = Arc::clone(&self.runner);
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            info!("Smart task: {}", prompt);
            let response = match runner.run(&prompt, token).await {
                Ok(outcome) => encode(&outcome),
                Err(e) => BridgeReply::err(e.to_string()),
            };
            let _ = reply.send(response);
        });
        self.active = Some(ActiveTask { stop, handle });
    }
}

fn encode<T: serde::Serialize>(value: &T) -> BridgeReply {
    match serde_json::to_value(value) {
        Ok(data) => BridgeReply::ok(data),
        Err(e) => BridgeReply::err(format!("failed to encode reply: {}", e)),
    }
}

impl std::fmt::Debug for BridgeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHost")
            .field("has_snapshot", &self.last_snapshot.is_some())
            .field("task_running", &self.task_running())
            .finish()
    }
}
