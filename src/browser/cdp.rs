//! Chrome DevTools Protocol transport
//!
//! One browser-level WebSocket carries every command. Session-scoped
//! commands are routed with the flat `sessionId` field returned by
//! `Target.attachToTarget {flatten: true}`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::core::CdpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<DashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can carry CDP commands
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Send one command and wait for its result object.
    ///
    /// `session` selects an attached target; `None` addresses the browser.
    async fn send(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> Result<Value, CdpError>;
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// WebSocket connection to the browser endpoint
pub struct CdpConnection {
    write: Arc<Mutex<SplitSink<WsStream, WsMessage>>>,
    pending: Pending,
    /// Set once the reader has stopped; nothing will answer after that
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpConnection {
    /// Resolve the browser WebSocket url from `http://host:port/json/version`
    pub async fn discover(host: &str, port: u16) -> Result<String, CdpError> {
        let url = format!("http://{}:{}/json/version", host, port);
        let client = reqwest::Client::builder()
            .timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CdpError::Connect(e.to_string()))?;

        let info: VersionInfo = client
            .get(&url)
            .send()
            .await
            .map_err(|e| CdpError::Connect(format!("{}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| CdpError::Connect(format!("bad /json/version payload: {}", e)))?;

        Ok(info.web_socket_debugger_url)
    }

    /// Discover and connect in one step
    pub async fn connect_to(
        host: &str,
        port: u16,
        command_timeout: Duration,
    ) -> Result<Self, CdpError> {
        let ws_url = Self::discover(host, port).await?;
        Self::connect(&ws_url, command_timeout).await
    }

    /// Connect to a browser WebSocket endpoint
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, CdpError> {
        let (stream, _) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(ws_url),
        )
        .await
        .map_err(|_| CdpError::Connect(format!("connect timed out: {}", ws_url)))?
        .map_err(|e| CdpError::Connect(e.to_string()))?;

        debug!("Connected to DevTools at {}", ws_url);

        let (write, read) = stream.split();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader_handle = tokio::spawn(Self::reader_loop(
            read,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Ok(Self {
            write: Arc::new(Mutex::new(write)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            command_timeout,
            reader_handle,
        })
    }

    /// Route responses to waiting callers by id
    async fn reader_loop(
        mut read: SplitStream<WsStream>,
        pending: Pending,
        closed: Arc<AtomicBool>,
    ) {
        while let Some(msg) = read.next().await {
            let text = match msg {
                Ok(WsMessage::Text(t)) => t,
                Ok(WsMessage::Close(_)) => break,
                Err(e) => {
                    debug!("CDP WebSocket read error: {}", e);
                    break;
                }
                _ => continue,
            };

            let frame: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let Some(id) = frame.get("id").and_then(Value::as_u64) else {
                // Events are not consumed; commands poll for the state they need
                trace!("CDP event {}", frame["method"]);
                continue;
            };

            if let Some((_, sender)) = pending.remove(&id) {
                let outcome = match frame.get("error") {
                    Some(error) => Err(CdpError::Protocol {
                        method: String::new(),
                        code: error["code"].as_i64().unwrap_or_default(),
                        message: error["message"].as_str().unwrap_or("CDP error").to_string(),
                    }),
                    None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = sender.send(outcome);
            }
        }

        debug!("CDP WebSocket closed");
        // Flag first so a send racing with the clear sees the closed state
        closed.store(true, Ordering::SeqCst);
        pending.clear();
    }

    /// Whether the socket has stopped delivering responses
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CdpTransport for CdpConnection {
    async fn send(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> Result<Value, CdpError> {
        if self.is_closed() {
            return Err(CdpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.is_closed() {
            self.pending.remove(&id);
            return Err(CdpError::Closed);
        }

        let mut msg = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session {
            msg["sessionId"] = Value::String(session.to_string());
        }
        trace!("CDP -> {}", msg);

        if let Err(e) = self
            .write
            .lock()
            .await
            .send(WsMessage::Text(msg.to_string()))
            .await
        {
            self.pending.remove(&id);
            debug!("CDP send failed: {}", e);
            return Err(CdpError::Closed);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(Err(CdpError::Protocol { code, message, .. }))) => Err(CdpError::Protocol {
                method: method.to_string(),
                code,
                message,
            }),
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                Err(CdpError::Timeout(method.to_string()))
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}
