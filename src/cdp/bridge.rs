//! Page-scoped view over the shared CDP connection.
//!
//! A `SessionBridge` is created for one attached page session. It tracks the
//! tree of child sessions attached underneath it (out-of-process iframes,
//! workers) and forwards events for the whole tree to its observers as
//! `{method, sessionId, params}`, so consumers multiplex purely on data.

use chromiumoxide_types::{Command, Method};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::transport::{CdpEvent, CdpTransport};
use crate::utils::{ToolError, ToolResult, with_timeout};

/// CDP error code used for commands addressed to a session that is gone
const SESSION_NOT_FOUND_CODE: i64 = -32001;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Commands must name the session they target; the root connection never
    /// receives implicitly-addressed traffic.
    #[error("CDP command '{0}' sent without a session id")]
    UnaddressedSend(String),
}

/// Event delivered to bridge observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeEvent {
    pub method: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub params: Value,
}

/// Outcome of a bridged command: the protocol `result` or its `error` object
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeReply {
    Result(Value),
    Error(Value),
}

impl BridgeReply {
    fn from_raw(mut raw: Value) -> Self {
        if let Some(error) = raw.get_mut("error") {
            return BridgeReply::Error(error.take());
        }
        BridgeReply::Result(raw.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BridgeReply::Error(_))
    }

    /// Human readable message of an error reply
    pub fn error_message(&self) -> Option<String> {
        match self {
            BridgeReply::Error(err) => Some(
                err.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            ),
            BridgeReply::Result(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, Value> {
        match self {
            BridgeReply::Result(v) => Ok(v),
            BridgeReply::Error(e) => Err(e),
        }
    }
}

pub type Observer = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Root session plus every descendant session, child -> parent
#[derive(Debug)]
struct SessionTree {
    root: String,
    parents: HashMap<String, String>,
}

impl SessionTree {
    fn new(root: String) -> Self {
        Self {
            root,
            parents: HashMap::new(),
        }
    }

    fn contains(&self, session_id: &str) -> bool {
        session_id == self.root || self.parents.contains_key(session_id)
    }

    fn attach(&mut self, parent: &str, child: &str) -> bool {
        if !self.contains(parent) || self.contains(child) {
            return false;
        }
        self.parents.insert(child.to_string(), parent.to_string());
        true
    }

    /// Remove `session_id` and all of its descendants. The root is never removed.
    fn detach(&mut self, session_id: &str) -> Vec<String> {
        if !self.parents.contains_key(session_id) {
            return Vec::new();
        }
        let mut removed = vec![session_id.to_string()];
        let mut i = 0;
        while i < removed.len() {
            let parent = removed[i].clone();
            let children: Vec<String> = self
                .parents
                .iter()
                .filter(|(_, p)| **p == parent)
                .map(|(c, _)| c.clone())
                .collect();
            removed.extend(children);
            i += 1;
        }
        for id in &removed {
            self.parents.remove(id);
        }
        removed
    }

    fn ids(&self) -> Vec<String> {
        let mut ids = vec![self.root.clone()];
        ids.extend(self.parents.keys().cloned());
        ids
    }
}

struct BridgeInner {
    transport: Arc<dyn CdpTransport>,
    tree: RwLock<SessionTree>,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl BridgeInner {
    fn route(&self, event: CdpEvent) {
        let Some(session_id) = event.session_id else {
            return;
        };
        if !self.tree.read().contains(&session_id) {
            return;
        }

        match event.method.as_str() {
            "Target.attachedToTarget" => {
                if let Some(child) = event.params.get("sessionId").and_then(Value::as_str)
                    && self.tree.write().attach(&session_id, child)
                {
                    debug!("Forwarding child session {} under {}", child, session_id);
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(child) = event.params.get("sessionId").and_then(Value::as_str) {
                    let removed = self.tree.write().detach(child);
                    if !removed.is_empty() {
                        debug!("Stopped forwarding sessions {:?}", removed);
                    }
                }
            }
            _ => {}
        }

        let delivered = BridgeEvent {
            method: event.method,
            session_id,
            params: event.params,
        };

        // Snapshot first so observers may (un)register from inside a callback.
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(&delivered);
        }
    }
}

/// Independent request/response + event channel for one page session
pub struct SessionBridge {
    inner: Arc<BridgeInner>,
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
}

impl SessionBridge {
    /// Start forwarding events for `root_session` and any session attached below it.
    pub fn new(transport: Arc<dyn CdpTransport>, root_session: impl Into<String>) -> Self {
        let root_session = root_session.into();
        let mut events = transport.subscribe();
        let inner = Arc::new(BridgeInner {
            transport,
            tree: RwLock::new(SessionTree::new(root_session.clone())),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        });

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let routed = inner.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => routed.route(event),
                        Err(RecvError::Lagged(n)) => {
                            warn!("Session {} dropped {} CDP events", root_session, n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            trace!("Session bridge forwarder for {} stopped", root_session);
        });

        Self {
            inner,
            cancel,
            forwarder,
        }
    }

    pub fn root_session(&self) -> String {
        self.inner.tree.read().root.clone()
    }

    /// Root session followed by every live child session
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.tree.read().ids()
    }

    pub fn is_tracked(&self, session_id: &str) -> bool {
        self.inner.tree.read().contains(session_id)
    }

    /// Send a command to a session in this bridge's tree.
    ///
    /// Only the missing-session-id case is an `Err`; everything that goes wrong
    /// on the wire comes back as `BridgeReply::Error` so one failed send in a
    /// batch doesn't abort its siblings.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<BridgeReply, BridgeError> {
        let Some(session_id) = session_id else {
            return Err(BridgeError::UnaddressedSend(method.to_string()));
        };

        if !self.is_tracked(session_id) {
            return Ok(BridgeReply::Error(json!({
                "code": SESSION_NOT_FOUND_CODE,
                "message": format!("Session with given id not found: {}", session_id),
            })));
        }

        match self
            .inner
            .transport
            .call(method, params, Some(session_id))
            .await
        {
            Ok(raw) => Ok(BridgeReply::from_raw(raw)),
            Err(e) => Ok(BridgeReply::Error(json!({ "message": e.to_string() }))),
        }
    }

    pub fn observe(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        self.inner.observers.write().push((id, observer));
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.forwarder.abort();
    }
}

/// A bridge bound to one concrete session id, the form tool handlers use
#[derive(Clone)]
pub struct PageSession {
    bridge: Arc<SessionBridge>,
    session_id: String,
    timeout: Duration,
}

impl PageSession {
    pub fn new(bridge: Arc<SessionBridge>, session_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bridge,
            session_id: session_id.into(),
            timeout,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn bridge(&self) -> &Arc<SessionBridge> {
        &self.bridge
    }

    /// Same session with a different command deadline
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Send a raw command, turning protocol errors into `ToolError::BackendAction`
    pub async fn send(&self, method: &str, params: Value) -> ToolResult<Value> {
        with_timeout(self.timeout, async {
            let reply = self
                .bridge
                .send(method, params, Some(&self.session_id))
                .await?;
            match reply {
                BridgeReply::Result(v) => Ok(v),
                err @ BridgeReply::Error(_) => Err(ToolError::action(format!(
                    "{} failed: {}",
                    method,
                    err.error_message().unwrap_or_default()
                ))),
            }
        })
        .await
    }

    /// Send a typed `chromiumoxide_cdp` command
    pub async fn execute<C: Command>(&self, cmd: C) -> ToolResult<C::Response> {
        let method = cmd.identifier();
        let params = serde_json::to_value(&cmd)?;
        let raw = self.send(&method, params).await?;
        serde_json::from_value(raw).map_err(|e| {
            ToolError::action(format!("Unexpected {} response: {}", method, e))
        })
    }
}
