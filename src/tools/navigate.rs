//! Page navigation - loads URLs, walks history and waits for page ready

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::cdp::{BridgeEvent, ObserverId, PageSession};
use crate::dispatch::{CdpContext, CdpTool};
use crate::pages::StableId;
use crate::response::CdpResponse;
use crate::utils::{ToolError, ToolResult, validate_navigation_timeout, with_timeout};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reject anything that isn't an absolute http(s), file or about URL
pub(crate) fn validate_url(raw: &str) -> ToolResult<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ToolError::validation(format!("Invalid URL '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" | "file" | "about" | "data" => Ok(parsed),
        other => Err(ToolError::validation(format!(
            "Unsupported URL scheme '{}'. Use http://, https://, file://, about: or data:",
            other
        ))),
    }
}

/// Fires once the page's main frame dispatches `load`
struct LoadWaiter {
    session: PageSession,
    fired: Arc<Notify>,
    observer: ObserverId,
}

impl LoadWaiter {
    /// Start listening before the command that triggers the load is sent
    fn arm(session: &PageSession) -> Self {
        let fired = Arc::new(Notify::new());
        let notify = fired.clone();
        let main = session.session_id().to_string();
        let observer = session.bridge().observe(Arc::new(move |event: &BridgeEvent| {
            if event.method == "Page.loadEventFired" && event.session_id == main {
                notify.notify_one();
            }
        }));
        Self {
            session: session.clone(),
            fired,
            observer,
        }
    }

    /// Wait for the load event, or for `document.readyState` to report complete
    async fn wait(self, timeout: Duration) -> ToolResult<()> {
        let result = with_timeout(timeout, async {
            tokio::select! {
                _ = self.fired.notified() => Ok(()),
                polled = poll_ready_state(&self.session) => polled,
            }
        })
        .await;
        self.session.bridge().unobserve(self.observer);
        result
    }
}

async fn poll_ready_state(session: &PageSession) -> ToolResult<()> {
    loop {
        let reply = session
            .send(
                "Runtime.evaluate",
                json!({ "expression": "document.readyState", "returnByValue": true }),
            )
            .await;
        match reply {
            Ok(v) if v.pointer("/result/value").and_then(Value::as_str) == Some("complete") => {
                return Ok(());
            }
            Ok(_) => {}
            // Execution context is torn down mid-navigation
            Err(e) => debug!("readyState probe failed: {}", e),
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

/// Block until the page is loaded
pub(crate) async fn wait_until_ready(session: &PageSession, timeout: Duration) -> ToolResult<()> {
    with_timeout(timeout, poll_ready_state(session)).await
}

/// Reload and wait for the new document to finish loading
pub(crate) async fn reload_page(session: &PageSession, timeout: Duration) -> ToolResult<()> {
    let waiter = LoadWaiter::arm(session);
    session.send("Page.reload", json!({ "ignoreCache": false })).await?;
    waiter.wait(timeout).await
}

/// Pull the current URL and title into the page registry
pub(crate) async fn refresh_page_info(ctx: &CdpContext, page: StableId, session: &PageSession) {
    let reply = session
        .send(
            "Runtime.evaluate",
            json!({
                "expression": "({ url: location.href, title: document.title })",
                "returnByValue": true,
            }),
        )
        .await;
    match reply {
        Ok(v) => {
            let info = v.pointer("/result/value");
            ctx.manager().pages().update_info(
                page,
                info.and_then(|i| i.get("url")).and_then(Value::as_str),
                info.and_then(|i| i.get("title")).and_then(Value::as_str),
            );
        }
        Err(e) => debug!("Could not refresh info for page {}: {}", page, e),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NavigationType {
    #[default]
    Url,
    Back,
    Forward,
    Reload,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavigatePageArgs {
    /// Target URL; required when type is "url"
    #[serde(default)]
    pub url: Option<String>,
    /// Navigate to a URL, go back, go forward or reload (default "url")
    #[serde(default, rename = "type")]
    pub navigation: NavigationType,
    /// Load timeout in milliseconds (default 30000, max 300000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Attach a fresh snapshot of the page to the response
    #[serde(default)]
    pub include_snapshot: bool,
}

#[derive(Clone, Default)]
pub struct NavigatePageTool;

impl NavigatePageTool {
    async fn go_to(session: &PageSession, url: &str, timeout: Duration) -> ToolResult<()> {
        let waiter = LoadWaiter::arm(session);
        let reply = session
            .with_deadline(timeout)
            .send("Page.navigate", json!({ "url": url }))
            .await?;

        if let Some(error) = reply.get("errorText").and_then(Value::as_str) {
            return Err(ToolError::action(format!("Navigation to {} failed: {}", url, error)));
        }
        // No loaderId: same-document navigation, nothing new will load
        if reply.get("loaderId").is_none() {
            return Ok(());
        }
        waiter.wait(timeout).await
    }

    async fn step_history(session: &PageSession, delta: i64, timeout: Duration) -> ToolResult<()> {
        let history = session.send("Page.getNavigationHistory", json!({})).await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::action("Navigation history has no current entry"))?;
        let entries = history
            .get("entries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let target = current + delta;
        let entry = usize::try_from(target)
            .ok()
            .and_then(|i| entries.get(i))
            .ok_or_else(|| {
                ToolError::action(match delta < 0 {
                    true => "Cannot go back: no previous page in history",
                    false => "Cannot go forward: no next page in history",
                })
            })?;
        let entry_id = entry
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::action("History entry has no id"))?;

        let waiter = LoadWaiter::arm(session);
        session
            .send("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        waiter.wait(timeout).await
    }

}

impl CdpTool for NavigatePageTool {
    type Args = NavigatePageArgs;

    fn name() -> &'static str {
        "navigate_page"
    }

    fn description() -> &'static str {
        "Navigate the selected page to a URL, back or forward in its history, or reload it. \
         Waits for the load event. Snapshot uids issued for the page before navigating \
         become stale.\n\n\
         Example: navigate_page({\"url\": \"https://www.rust-lang.org\"})\n\
         History: navigate_page({\"type\": \"back\"})"
    }

    async fn execute(&self, args: NavigatePageArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let timeout = validate_navigation_timeout(args.timeout_ms, 30_000)?;
        let url = match (args.navigation, args.url.as_deref()) {
            (NavigationType::Url, None) => {
                return Err(ToolError::validation("url is required when type is \"url\""));
            }
            (NavigationType::Url, Some(raw)) => Some(validate_url(raw)?.to_string()),
            _ => None,
        };

        let page = ctx.page_id()?;
        let session = ctx.session().await?;

        match (args.navigation, url.as_deref()) {
            (NavigationType::Url, Some(url)) => Self::go_to(&session, url, timeout).await?,
            (NavigationType::Back, _) => Self::step_history(&session, -1, timeout).await?,
            (NavigationType::Forward, _) => Self::step_history(&session, 1, timeout).await?,
            _ => reload_page(&session, timeout).await?,
        }

        ctx.manager().snapshots().invalidate(page);
        refresh_page_info(ctx, page, &session).await;

        let entry = ctx.manager().pages().entry(page)?;
        response.line(format!("Page {} is now at {}", page, entry.url));
        response.set("pageId", page);
        response.set("url", &entry.url);
        response.set("title", &entry.title);
        if args.include_snapshot {
            response.include_snapshot(Some(page), false);
        }
        Ok(())
    }
}
