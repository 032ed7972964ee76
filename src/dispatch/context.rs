//! Per-call contexts handed to tool handlers, one type per backend.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::MutexGuard;

use crate::collector::{ConsoleMessage, NetworkRequest, PageCollector};
use crate::controller::BoundExecutor;
use crate::enrichment::EnrichmentSource;
use crate::manager::{AttachedPage, BrowserManager};
use crate::cdp::PageSession;
use crate::pages::{PageEntry, StableId};
use crate::response::ImageFormat;
use crate::scope::{ScopeHandle, SessionState};
use crate::snapshot::{ElementHandle, PageSnapshot};
use crate::utils::{ToolError, ToolResult};

/// Everything a remote-debug handler may touch during one call
pub struct CdpContext {
    scope: Arc<ScopeHandle>,
    manager: Arc<BrowserManager>,
    page: Mutex<Option<StableId>>,
}

impl CdpContext {
    pub fn new(scope: Arc<ScopeHandle>, manager: Arc<BrowserManager>, page: Option<StableId>) -> Self {
        Self {
            scope,
            manager,
            page: Mutex::new(page),
        }
    }

    pub fn scope(&self) -> &Arc<ScopeHandle> {
        &self.scope
    }

    pub fn manager(&self) -> &Arc<BrowserManager> {
        &self.manager
    }

    pub async fn state(&self) -> MutexGuard<'_, SessionState> {
        self.scope.state().await
    }

    /// Page this call is routed to
    pub fn page_id(&self) -> ToolResult<StableId> {
        self.page.lock().ok_or(ToolError::NoPages)
    }

    /// Route the rest of the call (and its enrichments) to another page
    pub fn retarget(&self, page: StableId) {
        *self.page.lock() = Some(page);
    }

    pub async fn attached(&self) -> ToolResult<AttachedPage> {
        let page = self.page_id()?;
        self.manager.attach(page).await
    }

    pub async fn session(&self) -> ToolResult<PageSession> {
        Ok(self.attached().await?.session)
    }

    pub async fn session_for(&self, page: StableId) -> ToolResult<PageSession> {
        Ok(self.manager.attach(page).await?.session)
    }

    pub async fn collector_for(&self, page: StableId) -> ToolResult<Arc<PageCollector>> {
        Ok(self.manager.attach(page).await?.collector)
    }

    /// Capture a fresh snapshot generation for a page
    pub async fn capture_snapshot(&self, page: StableId, verbose: bool) -> ToolResult<Arc<PageSnapshot>> {
        let session = self.session_for(page).await?;
        self.manager.snapshots().capture(page, &session, verbose).await
    }

    /// Resolve a snapshot uid to a live element on whichever page issued it
    pub async fn element(&self, uid: &str) -> ToolResult<ElementHandle> {
        let resolved = self.manager.snapshots().resolve(uid)?;
        let session = self.session_for(resolved.page_id).await?;
        ElementHandle::attach(session, &resolved).await
    }

    pub async fn screenshot(&self, page: StableId, format: ImageFormat, full_page: bool) -> ToolResult<Vec<u8>> {
        let session = self.session_for(page).await?;
        let mut params = json!({ "format": format.as_str() });
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let shot = session.send("Page.captureScreenshot", params).await?;
        let data = shot
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::action("Page.captureScreenshot returned no data"))?;
        BASE64
            .decode(data)
            .map_err(|e| ToolError::action(format!("Invalid screenshot data: {}", e)))
    }
}

#[async_trait]
impl EnrichmentSource for CdpContext {
    fn default_page(&self) -> Option<StableId> {
        *self.page.lock()
    }

    async fn snapshot(&self, page: StableId, verbose: bool) -> ToolResult<Arc<PageSnapshot>> {
        self.capture_snapshot(page, verbose).await
    }

    async fn screenshot(&self, page: StableId, format: ImageFormat, full_page: bool) -> ToolResult<Vec<u8>> {
        CdpContext::screenshot(self, page, format, full_page).await
    }

    async fn pages(&self) -> ToolResult<Vec<PageEntry>> {
        self.manager.list_pages().await
    }

    async fn network_requests(&self, page: StableId) -> ToolResult<Vec<NetworkRequest>> {
        Ok(self.collector_for(page).await?.network_requests())
    }

    async fn console_messages(&self, page: StableId) -> ToolResult<Vec<ConsoleMessage>> {
        Ok(self.collector_for(page).await?.console_messages())
    }
}

/// Everything a controller handler may touch during one call
pub struct ControllerContext {
    scope: Arc<ScopeHandle>,
    executor: BoundExecutor,
}

impl ControllerContext {
    pub fn new(scope: Arc<ScopeHandle>, executor: BoundExecutor) -> Self {
        Self { scope, executor }
    }

    pub fn scope(&self) -> &Arc<ScopeHandle> {
        &self.scope
    }

    pub async fn state(&self) -> MutexGuard<'_, SessionState> {
        self.scope.state().await
    }

    /// Run an extension action bound to this scope's window
    pub async fn execute(&self, action: &str, payload: Value) -> ToolResult<Value> {
        Ok(self.executor.execute(action, payload).await?)
    }

    pub fn window_id(&self) -> Option<i64> {
        self.executor.window_id()
    }
}
