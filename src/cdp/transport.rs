//! Raw, multiplexed CDP connection over a browser websocket.
//!
//! One socket carries every target's traffic in flattened mode: commands are
//! addressed by `sessionId`, responses are correlated by `id`, and events are
//! fanned out to subscribers on a broadcast channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Capacity of the event fan-out channel; slow subscribers observe `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A protocol event as received on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Failed to connect to CDP endpoint {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Failed to send CDP command: {0}")]
    Send(String),

    #[error("CDP connection closed")]
    Closed,

    #[error("CDP command '{method}' timed out after {ms}ms")]
    Timeout { method: String, ms: u64 },
}

/// The shared low-level connection every session bridge sits on top of
#[async_trait]
pub trait CdpTransport: Send + Sync + 'static {
    /// Send one command and return the raw response object, which carries
    /// either a `result` or an `error` member.
    async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, TransportError>;

    /// Subscribe to every event on the connection, for all sessions.
    fn subscribe(&self) -> broadcast::Receiver<CdpEvent>;

    fn is_connected(&self) -> bool;
}

/// Websocket-backed CDP transport
pub struct WsTransport {
    ws_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<CdpEvent>,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to a browser-level websocket debugger URL
    pub async fn connect(ws_url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) =
            connect_async(ws_url)
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: ws_url.to_string(),
                    reason: e.to_string(),
                })?;
        let (mut sink, mut stream) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(msg)).await {
                    error!("CDP websocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            warn!("Dropping unparseable CDP frame ({} bytes)", text.len());
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = reader_pending.lock().remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if val.get("method").is_some() {
                            match serde_json::from_value::<CdpEvent>(val) {
                                // No receivers is fine: nobody is attached yet.
                                Ok(event) => {
                                    let _ = reader_events.send(event);
                                }
                                Err(e) => warn!("Malformed CDP event: {}", e),
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP websocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP websocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed error.
            reader_pending.lock().clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            events,
            connected,
            request_timeout,
            reader,
            writer,
        })
    }
}

#[async_trait]
impl CdpTransport for WsTransport {
    async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().remove(&id);
            return Err(TransportError::Send(e.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout {
                    method: method.to_string(),
                    ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        debug!("Dropping WsTransport - aborting reader/writer tasks");
        self.reader.abort();
        self.writer.abort();
    }
}
