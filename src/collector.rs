//! Per-page console, network, dialog and trace capture fed by bridge events.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::cdp::{BridgeEvent, Observer};
use crate::pages::StableId;
use crate::scope::DialogInfo;

/// Buffer sizes for collected page events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_max_console")]
    pub max_console_messages: usize,
    #[serde(default = "default_max_network")]
    pub max_network_requests: usize,
}

fn default_max_console() -> usize {
    500
}

fn default_max_network() -> usize {
    500
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_console_messages: default_max_console(),
            max_network_requests: default_max_network(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl NetworkRequest {
    pub fn summary(&self) -> String {
        let outcome = match (&self.failure, self.status) {
            (Some(reason), _) => format!("failed: {}", reason),
            (None, Some(status)) => status.to_string(),
            (None, None) => "pending".to_string(),
        };
        format!("{} {} [{}] {}", self.method, self.url, self.resource_type, outcome)
    }
}

#[derive(Default)]
struct Buffers {
    console: VecDeque<ConsoleMessage>,
    network: VecDeque<NetworkRequest>,
    dialog: Option<DialogInfo>,
    trace: Vec<Value>,
    trace_complete: bool,
}

/// Event sink for one page
pub struct PageCollector {
    page_id: StableId,
    main_session: String,
    config: CollectorConfig,
    buffers: Mutex<Buffers>,
    trace_done: Notify,
}

impl PageCollector {
    pub fn new(page_id: StableId, main_session: impl Into<String>, config: CollectorConfig) -> Arc<Self> {
        Arc::new(Self {
            page_id,
            main_session: main_session.into(),
            config,
            buffers: Mutex::new(Buffers::default()),
            trace_done: Notify::new(),
        })
    }

    pub fn page_id(&self) -> StableId {
        self.page_id
    }

    /// Observer closure to register on the page's bridge
    pub fn observer(self: &Arc<Self>) -> Observer {
        let collector = Arc::downgrade(self);
        Arc::new(move |event: &BridgeEvent| {
            if let Some(collector) = collector.upgrade() {
                collector.handle(event);
            }
        })
    }

    pub fn handle(&self, event: &BridgeEvent) {
        let params = &event.params;
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                let text = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|args| args.iter().map(remote_object_text).collect::<Vec<_>>().join(" "))
                    .unwrap_or_default();
                self.push_console(ConsoleMessage {
                    level: str_field(params, "type").unwrap_or_else(|| "log".into()),
                    text,
                    source: "console-api".into(),
                    url: params
                        .pointer("/stackTrace/callFrames/0/url")
                        .and_then(Value::as_str)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string),
                    timestamp: Utc::now(),
                });
            }
            "Log.entryAdded" => {
                let Some(entry) = params.get("entry") else { return };
                self.push_console(ConsoleMessage {
                    level: str_field(entry, "level").unwrap_or_else(|| "info".into()),
                    text: str_field(entry, "text").unwrap_or_default(),
                    source: str_field(entry, "source").unwrap_or_else(|| "other".into()),
                    url: str_field(entry, "url"),
                    timestamp: Utc::now(),
                });
            }
            "Runtime.exceptionThrown" => {
                let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
                let text = details
                    .pointer("/exception/description")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| str_field(details, "text"))
                    .unwrap_or_else(|| "Uncaught exception".into());
                self.push_console(ConsoleMessage {
                    level: "error".into(),
                    text,
                    source: "exception".into(),
                    url: str_field(details, "url"),
                    timestamp: Utc::now(),
                });
            }
            "Network.requestWillBeSent" => {
                let Some(request_id) = str_field(params, "requestId") else { return };
                let request = NetworkRequest {
                    request_id,
                    method: params
                        .pointer("/request/method")
                        .and_then(Value::as_str)
                        .unwrap_or("GET")
                        .to_string(),
                    url: params
                        .pointer("/request/url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    resource_type: str_field(params, "type").unwrap_or_else(|| "Other".into()),
                    status: None,
                    mime_type: None,
                    failure: None,
                };
                let mut buffers = self.buffers.lock();
                if buffers.network.len() >= self.config.max_network_requests {
                    buffers.network.pop_front();
                }
                buffers.network.push_back(request);
            }
            "Network.responseReceived" => {
                let Some(request_id) = str_field(params, "requestId") else { return };
                self.update_request(&request_id, |req| {
                    req.status = params.pointer("/response/status").and_then(Value::as_i64);
                    req.mime_type = params
                        .pointer("/response/mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                });
            }
            "Network.loadingFailed" => {
                let Some(request_id) = str_field(params, "requestId") else { return };
                let reason = str_field(params, "errorText").unwrap_or_else(|| "unknown".into());
                self.update_request(&request_id, |req| req.failure = Some(reason));
            }
            "Page.javascriptDialogOpening" => {
                let dialog = DialogInfo {
                    page_id: self.page_id,
                    dialog_type: str_field(params, "type").unwrap_or_else(|| "alert".into()),
                    message: str_field(params, "message").unwrap_or_default(),
                    default_prompt: str_field(params, "defaultPrompt"),
                    opened_at: Utc::now(),
                };
                debug!("Dialog opened on page {}: {}", self.page_id, dialog.message);
                self.buffers.lock().dialog = Some(dialog);
            }
            "Page.javascriptDialogClosed" => {
                self.buffers.lock().dialog = None;
            }
            "Page.frameNavigated" => {
                let main_frame = params.pointer("/frame/parentId").is_none();
                if main_frame && event.session_id == self.main_session {
                    let mut buffers = self.buffers.lock();
                    buffers.console.clear();
                    buffers.network.clear();
                }
            }
            "Tracing.dataCollected" => {
                if let Some(chunk) = params.get("value").and_then(Value::as_array) {
                    self.buffers.lock().trace.extend(chunk.iter().cloned());
                }
            }
            "Tracing.tracingComplete" => {
                self.buffers.lock().trace_complete = true;
                self.trace_done.notify_waiters();
            }
            _ => {}
        }
    }

    fn push_console(&self, message: ConsoleMessage) {
        let mut buffers = self.buffers.lock();
        if buffers.console.len() >= self.config.max_console_messages {
            buffers.console.pop_front();
        }
        buffers.console.push_back(message);
    }

    fn update_request(&self, request_id: &str, update: impl FnOnce(&mut NetworkRequest)) {
        let mut buffers = self.buffers.lock();
        if let Some(req) = buffers
            .network
            .iter_mut()
            .rev()
            .find(|r| r.request_id == request_id)
        {
            update(req);
        }
    }

    pub fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.buffers.lock().console.iter().cloned().collect()
    }

    pub fn network_requests(&self) -> Vec<NetworkRequest> {
        self.buffers.lock().network.iter().cloned().collect()
    }

    pub fn dialog(&self) -> Option<DialogInfo> {
        self.buffers.lock().dialog.clone()
    }

    pub fn clear_dialog(&self) {
        self.buffers.lock().dialog = None;
    }

    /// Reset trace capture before a new recording
    pub fn begin_trace(&self) {
        let mut buffers = self.buffers.lock();
        buffers.trace.clear();
        buffers.trace_complete = false;
    }

    /// Wait for `Tracing.tracingComplete` and hand back the collected events
    pub async fn finish_trace(&self, wait: Duration) -> Option<Vec<Value>> {
        let notified = self.trace_done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let complete = self.buffers.lock().trace_complete;
        if !complete && tokio::time::timeout(wait, notified).await.is_err() {
            return None;
        }
        let mut buffers = self.buffers.lock();
        buffers.trace_complete = false;
        Some(std::mem::take(&mut buffers.trace))
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn remote_object_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => str_field(arg, "description")
            .or_else(|| str_field(arg, "type"))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, session: &str, params: Value) -> BridgeEvent {
        BridgeEvent {
            method: method.into(),
            session_id: session.into(),
            params,
        }
    }

    fn small() -> CollectorConfig {
        CollectorConfig {
            max_console_messages: 2,
            max_network_requests: 2,
        }
    }

    #[test]
    fn console_buffer_is_bounded() {
        let collector = PageCollector::new(1, "S", small());
        for n in 0..3 {
            collector.handle(&event(
                "Runtime.consoleAPICalled",
                "S",
                json!({"type": "log", "args": [{"type": "string", "value": format!("msg {}", n)}, {"type": "number", "value": n}]}),
            ));
        }
        let messages = collector.console_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "msg 1 1");
        assert_eq!(messages[1].text, "msg 2 2");
    }

    #[test]
    fn network_lifecycle_updates_entry() {
        let collector = PageCollector::new(1, "S", CollectorConfig::default());
        collector.handle(&event(
            "Network.requestWillBeSent",
            "S",
            json!({"requestId": "r1", "type": "Document", "request": {"url": "https://a.test/", "method": "GET"}}),
        ));
        collector.handle(&event(
            "Network.requestWillBeSent",
            "S",
            json!({"requestId": "r2", "type": "Script", "request": {"url": "https://a.test/app.js", "method": "GET"}}),
        ));
        collector.handle(&event(
            "Network.responseReceived",
            "S",
            json!({"requestId": "r1", "response": {"status": 200, "mimeType": "text/html"}}),
        ));
        collector.handle(&event(
            "Network.loadingFailed",
            "S",
            json!({"requestId": "r2", "errorText": "net::ERR_BLOCKED"}),
        ));

        let requests = collector.network_requests();
        assert_eq!(requests[0].status, Some(200));
        assert_eq!(requests[0].summary(), "GET https://a.test/ [Document] 200");
        assert_eq!(requests[1].failure.as_deref(), Some("net::ERR_BLOCKED"));
    }

    #[test]
    fn main_frame_navigation_clears_buffers() {
        let collector = PageCollector::new(1, "S", CollectorConfig::default());
        collector.handle(&event(
            "Log.entryAdded",
            "S",
            json!({"entry": {"level": "warning", "text": "old", "source": "network"}}),
        ));
        // iframe navigation and child-session navigation keep the buffers
        collector.handle(&event("Page.frameNavigated", "S", json!({"frame": {"id": "f2", "parentId": "f1"}})));
        collector.handle(&event("Page.frameNavigated", "CHILD", json!({"frame": {"id": "f3"}})));
        assert_eq!(collector.console_messages().len(), 1);

        collector.handle(&event("Page.frameNavigated", "S", json!({"frame": {"id": "f1"}})));
        assert!(collector.console_messages().is_empty());
    }

    #[test]
    fn dialog_open_and_close() {
        let collector = PageCollector::new(7, "S", CollectorConfig::default());
        collector.handle(&event(
            "Page.javascriptDialogOpening",
            "S",
            json!({"type": "confirm", "message": "Leave?", "url": "https://a.test/"}),
        ));
        let dialog = collector.dialog().unwrap();
        assert_eq!(dialog.page_id, 7);
        assert_eq!(dialog.dialog_type, "confirm");
        collector.handle(&event("Page.javascriptDialogClosed", "S", json!({"result": true})));
        assert!(collector.dialog().is_none());
    }

    #[tokio::test]
    async fn trace_collection_waits_for_completion() {
        let collector = PageCollector::new(1, "S", CollectorConfig::default());
        collector.begin_trace();
        collector.handle(&event("Tracing.dataCollected", "S", json!({"value": [{"name": "a"}, {"name": "b"}]})));

        let waiter = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.finish_trace(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        collector.handle(&event("Tracing.tracingComplete", "S", json!({})));

        let events = waiter.await.unwrap().unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn trace_wait_times_out() {
        let collector = PageCollector::new(1, "S", CollectorConfig::default());
        collector.begin_trace();
        assert!(collector.finish_trace(Duration::from_millis(100)).await.is_none());
    }
}
