//! Websocket server the browser extension connects to.
//!
//! Requests go out as `{id, action, payload}`, replies come back as
//! `{id, ok, data}` or `{id, ok: false, error}`. Only the most recent
//! extension connection is used; a new one replaces the old.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActionExecutor, ControllerError};

type Reply = Result<Value, ControllerError>;

#[derive(Debug, Deserialize)]
struct Incoming {
    id: u64,
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

struct Client {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct ChannelInner {
    client: Mutex<Option<Client>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
}

impl ChannelInner {
    fn deliver(&self, text: &str) {
        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                debug!("Ignoring extension message: {}", e);
                return;
            }
        };
        let Some(tx) = self.pending.lock().remove(&incoming.id) else {
            debug!("Reply for unknown request {}", incoming.id);
            return;
        };
        let reply = if incoming.ok {
            Ok(incoming.data)
        } else {
            Err(ControllerError::Action(
                incoming.error.unwrap_or_else(|| "unknown error".into()),
            ))
        };
        let _ = tx.send(reply);
    }

    fn disconnect(&self, generation: u64) {
        let mut client = self.client.lock();
        if client.as_ref().map(|c| c.generation) != Some(generation) {
            return;
        }
        *client = None;
        drop(client);
        // Dropping the senders wakes every waiter with `Closed`
        let failed = std::mem::take(&mut *self.pending.lock());
        info!("Extension disconnected ({} request(s) abandoned)", failed.len());
    }
}

/// Removes a pending request when its caller stops waiting
struct PendingGuard<'a> {
    inner: &'a ChannelInner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

pub struct ExtensionChannel {
    inner: Arc<ChannelInner>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
}

impl ExtensionChannel {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Arc::new(ChannelInner::default());
        let cancel = CancellationToken::new();

        let acceptor = {
            let inner = inner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                tokio::spawn(serve(inner.clone(), stream, peer, cancel.clone()));
                            }
                            Err(e) => warn!("Extension accept failed: {}", e),
                        }
                    }
                }
            })
        };

        info!("Extension channel listening on {}", local_addr);
        Ok(Self {
            inner,
            local_addr,
            cancel,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.acceptor.abort();
        let generation = self.inner.client.lock().as_ref().map(|c| c.generation);
        if let Some(generation) = generation {
            self.inner.disconnect(generation);
        }
    }
}

impl Drop for ExtensionChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.acceptor.abort();
    }
}

async fn serve(inner: Arc<ChannelInner>, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Extension handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);

    if inner
        .client
        .lock()
        .replace(Client { generation, outbound })
        .is_some()
    {
        info!("Extension reconnected from {}, replacing previous connection", peer);
    } else {
        info!("Extension connected from {}", peer);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            queued = queue.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("Extension send failed: {}", e);
                        break;
                    }
                }
                // Replaced by a newer connection
                None => break,
            },
            received = source.next() => match received {
                Some(Ok(Message::Text(text))) => inner.deliver(&text),
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Extension connection error: {}", e);
                    break;
                }
            }
        }
    }

    inner.disconnect(generation);
}

#[async_trait]
impl ActionExecutor for ExtensionChannel {
    async fn execute(&self, action: &str, payload: Value) -> Result<Value, ControllerError> {
        let outbound = self
            .inner
            .client
            .lock()
            .as_ref()
            .map(|c| c.outbound.clone())
            .ok_or(ControllerError::NotConnected)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            inner: &self.inner,
            id,
        };

        let request = json!({ "id": id, "action": action, "payload": payload });
        outbound
            .send(request.to_string())
            .map_err(|_| ControllerError::NotConnected)?;
        debug!("Sent extension action {} ({})", action, id);

        rx.await.map_err(|_| ControllerError::Closed)?
    }

    fn is_connected(&self) -> bool {
        self.inner.client.lock().is_some()
    }
}
