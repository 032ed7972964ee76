//! Post-handler enrichment: carry out each declared intent once, best-effort.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collector::{ConsoleMessage, NetworkRequest};
use crate::pages::{PageEntry, StableId};
use crate::response::{ImageFormat, Intents, ResponseBuilder};
use crate::snapshot::{PageSnapshot, render};
use crate::utils::ToolResult;

/// Where enrichments get their data from
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Page the call operated on, used when an intent names no page
    fn default_page(&self) -> Option<StableId>;

    async fn snapshot(&self, page: StableId, verbose: bool) -> ToolResult<Arc<PageSnapshot>>;

    async fn screenshot(
        &self,
        page: StableId,
        format: ImageFormat,
        full_page: bool,
    ) -> ToolResult<Vec<u8>>;

    async fn pages(&self) -> ToolResult<Vec<PageEntry>>;

    async fn network_requests(&self, page: StableId) -> ToolResult<Vec<NetworkRequest>>;

    async fn console_messages(&self, page: StableId) -> ToolResult<Vec<ConsoleMessage>>;
}

fn target(source: &dyn EnrichmentSource, explicit: Option<StableId>, what: &str) -> Option<StableId> {
    let page = explicit.or_else(|| source.default_page());
    if page.is_none() {
        debug!("Skipping {} enrichment: no page", what);
    }
    page
}

fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

/// Execute every intent and append what succeeds. Failures are logged and dropped.
pub async fn enrich(source: &dyn EnrichmentSource, intents: Intents, builder: &mut ResponseBuilder) {
    if intents.pages {
        match source.pages().await {
            Ok(pages) => {
                let current = source.default_page();
                let mut text = String::from("## Pages");
                for page in &pages {
                    let marker = if Some(page.stable_id) == current { " [selected]" } else { "" };
                    text.push_str(&format!("\n{}: {} {}{}", page.stable_id, page.title, page.url, marker));
                }
                builder.block(text);
                builder.set("pages", &pages);
            }
            Err(e) => warn!("Page list enrichment failed: {}", e),
        }
    }

    if let Some(intent) = intents.snapshot
        && let Some(page) = target(source, intent.page, "snapshot")
    {
        match source.snapshot(page, intent.verbose).await {
            Ok(snapshot) => {
                builder.block(format!("## Page {} snapshot\n{}", page, render(&snapshot)));
                builder.set(
                    "snapshot",
                    json!({ "pageId": page, "generation": snapshot.generation }),
                );
            }
            Err(e) => warn!("Snapshot enrichment for page {} failed: {}", page, e),
        }
    }

    if let Some(intent) = intents.screenshot
        && let Some(page) = target(source, intent.page, "screenshot")
    {
        match source.screenshot(page, intent.format, intent.full_page).await {
            Ok(bytes) => {
                builder.image(&bytes, intent.format.mime_type());
                builder.set(
                    "screenshot",
                    json!({ "pageId": page, "format": intent.format, "bytes": bytes.len() }),
                );
            }
            Err(e) => warn!("Screenshot enrichment for page {} failed: {}", page, e),
        }
    }

    if let Some(limit) = intents.network_requests
        && let Some(page) = target(source, None, "network")
    {
        match source.network_requests(page).await {
            Ok(requests) => {
                let requests = tail(requests, limit);
                let mut text = format!("## Network requests ({})", requests.len());
                for request in &requests {
                    text.push('\n');
                    text.push_str(&request.summary());
                }
                builder.block(text);
                builder.set("networkRequests", &requests);
            }
            Err(e) => warn!("Network enrichment for page {} failed: {}", page, e),
        }
    }

    if let Some(limit) = intents.console_data
        && let Some(page) = target(source, None, "console")
    {
        match source.console_messages(page).await {
            Ok(messages) => {
                let messages = tail(messages, limit);
                let mut text = format!("## Console messages ({})", messages.len());
                for message in &messages {
                    text.push_str(&format!("\n[{}] {}", message.level, message.text));
                }
                builder.block(text);
                builder.set("consoleMessages", &messages);
            }
            Err(e) => warn!("Console enrichment for page {} failed: {}", page, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::CdpResponse;
    use crate::snapshot::build_snapshot;
    use crate::utils::ToolError;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Source {
        fail_screenshot: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl EnrichmentSource for Source {
        fn default_page(&self) -> Option<StableId> {
            Some(1)
        }

        async fn snapshot(&self, page: StableId, verbose: bool) -> ToolResult<Arc<PageSnapshot>> {
            self.calls.lock().push("snapshot");
            Ok(Arc::new(build_snapshot(
                page,
                4,
                &crate::snapshot::tree::fixtures::login_page(),
                &HashMap::new(),
                verbose,
            )))
        }

        async fn screenshot(&self, _: StableId, _: ImageFormat, _: bool) -> ToolResult<Vec<u8>> {
            self.calls.lock().push("screenshot");
            if self.fail_screenshot {
                return Err(ToolError::action("Page.captureScreenshot failed: boom"));
            }
            Ok(vec![0x89, 0x50])
        }

        async fn pages(&self) -> ToolResult<Vec<PageEntry>> {
            self.calls.lock().push("pages");
            Err(ToolError::BackendUnavailable("gone".into()))
        }

        async fn network_requests(&self, _: StableId) -> ToolResult<Vec<NetworkRequest>> {
            Ok(Vec::new())
        }

        async fn console_messages(&self, _: StableId) -> ToolResult<Vec<ConsoleMessage>> {
            self.calls.lock().push("console");
            Ok((0..5)
                .map(|n| ConsoleMessage {
                    level: "log".into(),
                    text: format!("line {}", n),
                    source: "console-api".into(),
                    url: None,
                    timestamp: Utc::now(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn failed_screenshot_is_omitted() {
        let source = Source {
            fail_screenshot: true,
            ..Default::default()
        };
        let mut response = CdpResponse::new();
        response.line("Clicked 1_4_2");
        response.set("clicked", true);
        response.include_screenshot(None, ImageFormat::Png, false);
        let (mut builder, intents) = response.into_parts();

        enrich(&source, intents, &mut builder).await;
        let output = builder.finish();

        assert!(!output.is_error);
        assert_eq!(output.text(), "Clicked 1_4_2");
        assert_eq!(output.images().count(), 0);
        assert_eq!(output.field("clicked"), Some(&json!(true)));
        assert!(output.field("screenshot").is_none());
    }

    #[tokio::test]
    async fn each_intent_runs_once() {
        let source = Source::default();
        let mut response = CdpResponse::new();
        response
            .include_snapshot(None, false)
            .include_snapshot(None, true)
            .include_screenshot(Some(1), ImageFormat::Jpeg, true)
            .include_pages()
            .include_console_data(2);
        let (mut builder, intents) = response.into_parts();

        enrich(&source, intents, &mut builder).await;
        assert_eq!(*source.calls.lock(), vec!["pages", "snapshot", "screenshot", "console"]);

        let output = builder.finish();
        assert_eq!(output.images().count(), 1);
        assert_eq!(output.field("snapshot"), Some(&json!({"pageId": 1, "generation": 4})));
        assert!(output.text().contains("## Page 1 snapshot"));
        assert!(output.text().contains("[log] line 4"));
        assert!(!output.text().contains("line 2"));
        // pages failed and left no trace
        assert!(output.field("pages").is_none());
    }
}
