//! Browser connection lifecycle shared by every remote-debug tool call.
//!
//! The connection is created lazily on first use. Acquisition only checks that
//! the websocket is still up; `Browser.getVersion` is sent after a transport
//! error, and a dead connection is torn down and replaced on the next call.
//! Target discovery keeps the page registry in step with the browser, and pages
//! are attached (flattened sessions) only when a tool first needs them.

use chromiumoxide_cdp::cdp::browser_protocol::target::TargetId;
use dashmap::DashMap;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, Connected, Connector, LaunchedBrowser};
use crate::cdp::{CdpEvent, CdpTransport, PageSession, SessionBridge};
use crate::collector::{CollectorConfig, PageCollector};
use crate::pages::{PageEntry, PageRegistry, StableId};
use crate::snapshot::SnapshotStore;
use crate::utils::{ToolError, ToolResult};

/// Domains enabled on every attached page, plus auto-attach for child targets
const PAGE_SETUP: &[(&str, &str)] = &[
    ("Page.enable", "{}"),
    ("Runtime.enable", "{}"),
    ("Network.enable", "{}"),
    ("Log.enable", "{}"),
    (
        "Target.setAutoAttach",
        r#"{"autoAttach":true,"waitForDebuggerOnStart":false,"flatten":true}"#,
    ),
];

/// A page with a live session and its event collector
#[derive(Clone)]
pub struct AttachedPage {
    pub session: PageSession,
    pub collector: Arc<PageCollector>,
}

struct Connection {
    epoch: u64,
    transport: Arc<dyn CdpTransport>,
    process: Option<LaunchedBrowser>,
    cancel: CancellationToken,
    sync: JoinHandle<()>,
}

impl Connection {
    async fn close(self) {
        self.cancel.cancel();
        self.sync.abort();
        drop(self.transport);
        if let Some(process) = self.process {
            process.close().await;
        }
    }
}

/// State touched by both tool calls and the target sync task
struct Shared {
    pages: Arc<PageRegistry>,
    snapshots: Arc<SnapshotStore>,
    attached: DashMap<StableId, AttachedPage>,
}

impl Shared {
    fn forget(&self, id: StableId) {
        self.snapshots.invalidate(id);
        if self.attached.remove(&id).is_some() {
            debug!("Detached page {}", id);
        }
    }

    fn close_page(&self, id: StableId) {
        if self.pages.mark_closed(id) {
            info!("Page {} closed", id);
        }
        self.forget(id);
    }

    /// Register or refresh one `TargetInfo`; returns its stable id for pages
    fn observe_target(&self, info: &Value) -> Option<StableId> {
        if info.get("type").and_then(Value::as_str) != Some("page") {
            return None;
        }
        let target_id = TargetId::new(info.get("targetId")?.as_str()?);
        let id = self.pages.register(target_id);
        self.pages.update_info(
            id,
            info.get("url").and_then(Value::as_str),
            info.get("title").and_then(Value::as_str),
        );
        Some(id)
    }

    fn on_event(&self, event: CdpEvent) {
        if event.session_id.is_some() {
            return;
        }
        match event.method.as_str() {
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                if let Some(info) = event.params.get("targetInfo") {
                    self.observe_target(info);
                }
            }
            "Target.targetDestroyed" => {
                let Some(target) = event.params.get("targetId").and_then(Value::as_str) else {
                    return;
                };
                if let Some(id) = self.pages.mark_closed_native(&TargetId::new(target)) {
                    info!("Page {} destroyed by the browser", id);
                    self.forget(id);
                }
            }
            "Target.detachedFromTarget" => {
                let Some(session) = event.params.get("sessionId").and_then(Value::as_str) else {
                    return;
                };
                let detached: Vec<StableId> = self
                    .attached
                    .iter()
                    .filter(|entry| entry.value().session.session_id() == session)
                    .map(|entry| *entry.key())
                    .collect();
                for id in detached {
                    self.pages.set_session(id, None);
                    self.forget(id);
                }
            }
            _ => {}
        }
    }

    /// Reconcile the registry with a `Target.getTargets` listing
    fn sync_targets(&self, infos: &[Value]) {
        let seen: HashSet<StableId> = infos.iter().filter_map(|i| self.observe_target(i)).collect();
        for page in self.pages.live_pages() {
            if !seen.contains(&page.stable_id) {
                self.close_page(page.stable_id);
            }
        }
    }
}

/// Extract the `result` of a raw browser-level response
fn reply(method: &str, raw: Value) -> Result<Value, String> {
    if let Some(error) = raw.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(format!("{} failed: {}", method, message));
    }
    Ok(raw.get("result").cloned().unwrap_or(Value::Null))
}

pub struct BrowserManager {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
    epochs: AtomicU64,
    /// One lock per page so only attaches of the same page wait on each other
    attach_locks: DashMap<StableId, Arc<Mutex<()>>>,
    command_timeout: Duration,
    collector_config: CollectorConfig,
}

impl BrowserManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        command_timeout: Duration,
        collector_config: CollectorConfig,
    ) -> Self {
        let pages = Arc::new(PageRegistry::new());
        Self {
            connector,
            shared: Arc::new(Shared {
                snapshots: Arc::new(SnapshotStore::new(pages.clone())),
                pages,
                attached: DashMap::new(),
            }),
            connection: Mutex::new(None),
            epochs: AtomicU64::new(0),
            attach_locks: DashMap::new(),
            command_timeout,
            collector_config,
        }
    }

    pub fn pages(&self) -> &Arc<PageRegistry> {
        &self.shared.pages
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.shared.snapshots
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Live transport, connecting on first use or after the old one dropped
    pub async fn transport(&self) -> ToolResult<Arc<dyn CdpTransport>> {
        self.acquire().await.map(|(_, transport)| transport)
    }

    /// Transport plus the epoch of the connection it belongs to. The connection
    /// lock is only held to read the slot or to replace it.
    async fn acquire(&self) -> ToolResult<(u64, Arc<dyn CdpTransport>)> {
        let current = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| (c.epoch, c.transport.clone()));
        match current {
            Some((epoch, transport)) if transport.is_connected() => Ok((epoch, transport)),
            stale => self.reconnect(stale.map(|(epoch, _)| epoch)).await,
        }
    }

    /// Replace the connection seen as `stale` unless another caller already did
    async fn reconnect(&self, stale: Option<u64>) -> ToolResult<(u64, Arc<dyn CdpTransport>)> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            if Some(connection.epoch) != stale && connection.transport.is_connected() {
                return Ok((connection.epoch, connection.transport.clone()));
            }
            warn!("Browser connection lost, reconnecting");
            if let Some(dead) = guard.take() {
                dead.close().await;
            }
            self.shared.attached.clear();
        }

        info!("Connecting to browser");
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = self.open(epoch).await?;
        let transport = connection.transport.clone();
        *guard = Some(connection);
        Ok((epoch, transport))
    }

    /// After a transport error: drop the connection if the browser stopped answering
    async fn recover(&self, epoch: u64, failed: &Arc<dyn CdpTransport>) {
        if healthy(failed.as_ref()).await {
            return;
        }
        let dead = {
            let mut guard = self.connection.lock().await;
            match guard.as_ref() {
                Some(c) if c.epoch == epoch => guard.take(),
                _ => None,
            }
        };
        if let Some(dead) = dead {
            warn!("Browser stopped responding, dropping the connection");
            self.shared.attached.clear();
            dead.close().await;
        }
    }

    async fn open(&self, epoch: u64) -> Result<Connection, BrowserError> {
        let Connected { transport, process } = self.connector.connect().await?;

        // Subscribe before enabling discovery so no targetCreated is missed
        let mut events = transport.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = self.shared.clone();
        let sync = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => shared.on_event(event),
                        Err(RecvError::Lagged(n)) => warn!("Target sync dropped {} events", n),
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("Target sync stopped");
        });

        let connection = Connection {
            epoch,
            transport,
            process,
            cancel,
            sync,
        };

        match self.discover(connection.transport.as_ref()).await {
            Ok(()) => Ok(connection),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn discover(&self, transport: &dyn CdpTransport) -> Result<(), BrowserError> {
        let call = |method: &'static str, params: Value| async move {
            let raw = transport.call(method, params, None).await?;
            reply(method, raw).map_err(|message| BrowserError::Protocol {
                method: method.to_string(),
                message,
            })
        };

        call("Target.setDiscoverTargets", json!({ "discover": true })).await?;
        let targets = call("Target.getTargets", json!({})).await?;
        let infos = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        self.shared.sync_targets(infos);
        info!("Browser connected with {} page(s)", self.shared.pages.live_pages().len());
        Ok(())
    }

    async fn browser_call(&self, method: &str, params: Value) -> ToolResult<Value> {
        let (epoch, transport) = self.acquire().await?;
        let raw = match transport.call(method, params, None).await {
            Ok(raw) => raw,
            Err(e) => {
                self.recover(epoch, &transport).await;
                return Err(ToolError::BackendUnavailable(e.to_string()));
            }
        };
        reply(method, raw).map_err(ToolError::BackendAction)
    }

    /// Attach to a page on first use and return its session
    pub async fn attach(&self, id: StableId) -> ToolResult<AttachedPage> {
        let (epoch, transport) = self.acquire().await?;
        if let Some(attached) = self.shared.attached.get(&id) {
            return Ok(attached.clone());
        }

        let lock = self.attach_locks.entry(id).or_default().clone();
        let _attaching = lock.lock().await;
        if let Some(attached) = self.shared.attached.get(&id) {
            return Ok(attached.clone());
        }

        let target = self.shared.pages.resolve(id)?;
        let raw = match transport
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target.inner(), "flatten": true }),
                None,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.recover(epoch, &transport).await;
                return Err(ToolError::BackendUnavailable(e.to_string()));
            }
        };
        let result = reply("Target.attachToTarget", raw).map_err(ToolError::BackendAction)?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::action("Target.attachToTarget returned no sessionId"))?
            .to_string();

        let bridge = Arc::new(SessionBridge::new(transport, session_id.clone()));
        let collector = PageCollector::new(id, session_id.clone(), self.collector_config);
        bridge.observe(collector.observer());
        let session = PageSession::new(bridge, session_id.clone(), self.command_timeout);

        for (method, params) in PAGE_SETUP {
            let params: Value = serde_json::from_str(params)?;
            if let Err(e) = session.send(method, params).await {
                warn!("{} on page {}: {}", method, id, e);
            }
        }

        self.shared.pages.set_session(id, Some(session_id.clone()));
        let attached = AttachedPage { session, collector };
        self.shared.attached.insert(id, attached.clone());
        info!("Attached page {} (session {})", id, session_id);
        Ok(attached)
    }

    /// Collector of an already attached page
    pub fn collector(&self, id: StableId) -> Option<Arc<PageCollector>> {
        self.shared.attached.get(&id).map(|a| a.collector.clone())
    }

    /// Open pages, connecting first so the list reflects the browser
    pub async fn list_pages(&self) -> ToolResult<Vec<PageEntry>> {
        self.transport().await?;
        Ok(self.shared.pages.live_pages())
    }

    pub async fn new_page(&self, url: &str) -> ToolResult<StableId> {
        let created = self
            .browser_call("Target.createTarget", json!({ "url": url }))
            .await?;
        let target = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::action("Target.createTarget returned no targetId"))?;
        let id = self.shared.pages.register(TargetId::new(target));
        self.shared.pages.update_info(id, Some(url), None);
        info!("Opened page {} at {}", id, url);
        Ok(id)
    }

    pub async fn close_page(&self, id: StableId) -> ToolResult<()> {
        let target = self.shared.pages.resolve(id)?;
        self.browser_call("Target.closeTarget", json!({ "targetId": target.inner() }))
            .await?;
        self.shared.close_page(id);
        self.attach_locks.remove(&id);
        Ok(())
    }

    pub async fn is_browser_running(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Drop every session and stop the browser if this process launched it
    pub async fn shutdown(&self) {
        let connection = self.connection.lock().await.take();
        self.shared.attached.clear();
        if let Some(connection) = connection {
            info!("Shutting down browser connection");
            connection.close().await;
        }
    }
}

async fn healthy(transport: &dyn CdpTransport) -> bool {
    if !transport.is_connected() {
        return false;
    }
    match transport.call("Browser.getVersion", json!({}), None).await {
        Ok(raw) => raw.get("error").is_none(),
        Err(e) => {
            debug!("Browser.getVersion failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_extracts_result_or_message() {
        assert_eq!(
            reply("Target.getTargets", json!({"id": 1, "result": {"targetInfos": []}})).unwrap(),
            json!({"targetInfos": []})
        );
        assert_eq!(
            reply("Target.closeTarget", json!({"id": 2, "error": {"code": -32000, "message": "No target with given id found"}})),
            Err("Target.closeTarget failed: No target with given id found".to_string())
        );
    }

    #[test]
    fn page_setup_params_are_json() {
        for (_, params) in PAGE_SETUP {
            assert!(serde_json::from_str::<Value>(params).unwrap().is_object());
        }
    }
}
