//! In-process fakes standing in for a browser and an extension.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use kodegen_browser_bridge::browser::{BrowserResult, Connected, Connector};
use kodegen_browser_bridge::cdp::{CdpEvent, CdpTransport, TransportError};
use kodegen_browser_bridge::collector::CollectorConfig;
use kodegen_browser_bridge::controller::ActionExecutor;
use kodegen_browser_bridge::dispatch::{InMemoryMetrics, ToolDefinition};
use kodegen_browser_bridge::scope::ScopeConfig;
use kodegen_browser_bridge::tools::all_tools;
use kodegen_browser_bridge::{
    BrowserError, BrowserManager, ControllerError, Dispatcher, ScopeManager, ToolRegistry,
};

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub session: Option<String>,
    pub params: Value,
}

#[derive(Debug, Clone)]
struct Target {
    id: String,
    url: String,
    title: String,
}

#[derive(Default)]
struct FakeState {
    targets: Vec<Target>,
    next_target: u32,
    sessions: HashMap<String, String>,
    calls: Vec<Call>,
    gone_nodes: HashSet<i64>,
}

/// A browser that answers just enough CDP for the tools under test
pub struct FakeBrowser {
    state: Mutex<FakeState>,
    events: broadcast::Sender<CdpEvent>,
    delays: Mutex<HashMap<String, Duration>>,
    pub fail_screenshots: AtomicBool,
    /// Cleared to simulate a dropped websocket; set again on reconnect
    pub connected: AtomicBool,
    pub connects: AtomicUsize,
}

impl FakeBrowser {
    /// One page open at https://example.test/login
    pub fn new() -> Arc<Self> {
        let browser = Self::empty();
        browser.add_target("https://example.test/login", "Login");
        browser
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            events: broadcast::channel(256).0,
            delays: Mutex::new(HashMap::new()),
            fail_screenshots: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
        })
    }

    /// Make every call to `method` take `delay` before answering
    pub fn delay(&self, method: &str, delay: Duration) {
        self.delays.lock().insert(method.to_string(), delay);
    }

    fn add_target(&self, url: &str, title: &str) -> String {
        let mut state = self.state.lock();
        state.next_target += 1;
        let id = format!("TARGET-{}", state.next_target);
        state.targets.push(Target {
            id: id.clone(),
            url: url.to_string(),
            title: title.to_string(),
        });
        id
    }

    /// Backend node that no longer exists in the DOM
    pub fn remove_node(&self, backend_node_id: i64) {
        self.state.lock().gone_nodes.insert(backend_node_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    pub fn emit(&self, method: &str, session: Option<&str>, params: Value) {
        let _ = self.events.send(CdpEvent {
            method: method.to_string(),
            session_id: session.map(str::to_string),
            params,
        });
    }

    fn target_info(target: &Target) -> Value {
        json!({
            "targetId": target.id,
            "type": "page",
            "url": target.url,
            "title": target.title,
            "attached": false,
        })
    }

    fn target_of(&self, session: Option<&str>) -> Option<Target> {
        let state = self.state.lock();
        let target = state.sessions.get(session?)?;
        state.targets.iter().find(|t| &t.id == target).cloned()
    }

    fn answer(&self, method: &str, params: &Value, session: Option<&str>) -> Result<Value, String> {
        match method {
            "Browser.getVersion" => Ok(json!({ "product": "FakeChrome/1.0", "userAgent": "Fake" })),
            "Target.getTargets" => {
                let state = self.state.lock();
                Ok(json!({ "targetInfos": state.targets.iter().map(Self::target_info).collect::<Vec<_>>() }))
            }
            "Target.createTarget" => {
                let url = params["url"].as_str().unwrap_or("about:blank");
                let id = self.add_target(url, "");
                let info = Self::target_info(&Target {
                    id: id.clone(),
                    url: url.to_string(),
                    title: String::new(),
                });
                self.emit("Target.targetCreated", None, json!({ "targetInfo": info }));
                Ok(json!({ "targetId": id }))
            }
            "Target.closeTarget" => {
                let id = params["targetId"].as_str().unwrap_or_default().to_string();
                let removed = {
                    let mut state = self.state.lock();
                    let before = state.targets.len();
                    state.targets.retain(|t| t.id != id);
                    before != state.targets.len()
                };
                if !removed {
                    return Err("No target with given id found".into());
                }
                self.emit("Target.targetDestroyed", None, json!({ "targetId": id }));
                Ok(json!({ "success": true }))
            }
            "Target.attachToTarget" => {
                let id = params["targetId"].as_str().unwrap_or_default().to_string();
                let session = format!("SESSION-{}", id);
                self.state.lock().sessions.insert(session.clone(), id);
                Ok(json!({ "sessionId": session }))
            }
            "Accessibility.getFullAXTree" => Ok(login_tree()),
            "DOMSnapshot.captureSnapshot" => Err("DOMSnapshot is not supported".into()),
            "DOM.resolveNode" => {
                let node = params["backendNodeId"].as_i64().unwrap_or_default();
                if self.state.lock().gone_nodes.contains(&node) {
                    return Err("No node with given id found".into());
                }
                Ok(json!({ "object": { "type": "object", "objectId": format!("obj-{}", node) } }))
            }
            "DOM.getBoxModel" => {
                let quad = json!([10, 20, 110, 20, 110, 60, 10, 60]);
                Ok(json!({ "model": { "content": quad, "padding": quad, "border": quad, "margin": quad, "width": 100, "height": 40 } }))
            }
            "Page.captureScreenshot" => {
                if self.fail_screenshots.load(Ordering::SeqCst) {
                    Err("Unable to capture screenshot".into())
                } else {
                    Ok(json!({ "data": "UE5H" }))
                }
            }
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or_default().to_string();
                if let Some(target) = self.target_of(session) {
                    let mut state = self.state.lock();
                    if let Some(t) = state.targets.iter_mut().find(|t| t.id == target.id) {
                        t.url = url;
                        t.title = "Navigated".into();
                    }
                }
                self.emit("Page.loadEventFired", session, json!({ "timestamp": 1.0 }));
                Ok(json!({ "frameId": "FRAME", "loaderId": "LOADER" }))
            }
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                if expression == "document.readyState" {
                    return Ok(json!({ "result": { "type": "string", "value": "complete" } }));
                }
                if expression.contains("location.href") {
                    let target = self.target_of(session);
                    return Ok(json!({ "result": { "type": "object", "value": {
                        "url": target.as_ref().map(|t| t.url.clone()).unwrap_or_default(),
                        "title": target.as_ref().map(|t| t.title.clone()).unwrap_or_default(),
                    } } }));
                }
                if expression.contains("throw") {
                    return Ok(json!({
                        "result": { "type": "object", "subtype": "error" },
                        "exceptionDetails": { "text": "Uncaught", "exception": { "description": "Error: nope" } }
                    }));
                }
                Ok(json!({ "result": { "type": "string", "value": "Login" } }))
            }
            _ => Ok(json!({})),
        }
    }
}

#[async_trait]
impl CdpTransport for FakeBrowser {
    async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value, TransportError> {
        self.state.lock().calls.push(Call {
            method: method.to_string(),
            session: session_id.map(str::to_string),
            params: params.clone(),
        });
        let delay = self.delays.lock().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match self.answer(method, &params, session_id) {
            Ok(result) => json!({ "id": 1, "result": result }),
            Err(message) => json!({ "id": 1, "error": { "code": -32000, "message": message } }),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct FakeConnector(pub Arc<FakeBrowser>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> BrowserResult<Connected> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.connected.store(true, Ordering::SeqCst);
        Ok(Connected {
            transport: self.0.clone(),
            process: None,
        })
    }
}

/// A connector whose browser never starts
pub struct NoBrowser;

#[async_trait]
impl Connector for NoBrowser {
    async fn connect(&self) -> BrowserResult<Connected> {
        Err(BrowserError::NotFound("no chrome in this test".into()))
    }
}

/// Extension stand-in that answers from a fixed table and records actions
#[derive(Default)]
pub struct FakeExtension {
    pub actions: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl ActionExecutor for FakeExtension {
    async fn execute(&self, action: &str, payload: Value) -> Result<Value, ControllerError> {
        self.actions.lock().push((action.to_string(), payload));
        match action {
            "getTabs" => Ok(json!({ "tabs": [
                { "id": 11, "title": "Docs", "url": "https://docs.test", "active": true },
                { "id": 12, "title": "Mail", "url": "https://mail.test" }
            ] })),
            "switchTab" => Ok(json!({ "windowId": 7 })),
            "getExtensions" => Ok(json!({ "extensions": [
                { "id": "abc", "name": "Bridge", "version": "1.2.0", "enabled": true }
            ] })),
            "searchHistory" => Ok(json!({ "items": [] })),
            "getBookmarks" => Ok(json!([])),
            other => Err(ControllerError::Action(format!("unknown action {}", other))),
        }
    }
}

/// RootWebArea "Login" > heading, button "Submit" (104), textbox "Email" (105), link
pub fn login_tree() -> Value {
    fn ax(id: &str, parent: Option<&str>, role: &str, name: &str, backend: i64, children: &[&str]) -> Value {
        let mut node = json!({
            "nodeId": id,
            "ignored": false,
            "role": { "type": "role", "value": role },
            "name": { "type": "computedString", "value": name },
            "backendDOMNodeId": backend,
            "childIds": children,
        });
        if let Some(parent) = parent {
            node["parentId"] = json!(parent);
        }
        node
    }
    json!({ "nodes": [
        ax("1", None, "RootWebArea", "Login", 101, &["2", "4", "5", "6"]),
        ax("2", Some("1"), "heading", "Sign in", 102, &[]),
        ax("4", Some("1"), "button", "Submit", 104, &[]),
        ax("5", Some("1"), "textbox", "Email", 105, &[]),
        ax("6", Some("1"), "link", "Forgot password?", 106, &[]),
    ] })
}

pub struct Harness {
    pub browser: Arc<FakeBrowser>,
    pub extension: Arc<FakeExtension>,
    pub manager: Arc<BrowserManager>,
    pub scopes: Arc<ScopeManager>,
    pub metrics: Arc<InMemoryMetrics>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_tools(FakeBrowser::new(), Vec::new())
    }

    pub fn with_tools(browser: Arc<FakeBrowser>, extra: Vec<ToolDefinition>) -> Self {
        Self::build(Arc::new(FakeConnector(browser.clone())), browser, extra)
    }

    pub fn without_browser() -> Self {
        Self::build(Arc::new(NoBrowser), FakeBrowser::empty(), Vec::new())
    }

    fn build(connector: Arc<dyn Connector>, browser: Arc<FakeBrowser>, extra: Vec<ToolDefinition>) -> Self {
        let manager = Arc::new(BrowserManager::new(
            connector,
            Duration::from_secs(5),
            CollectorConfig::default(),
        ));
        let extension = Arc::new(FakeExtension::default());
        let metrics = Arc::new(InMemoryMetrics::new());
        let mut tools = all_tools();
        tools.extend(extra);
        let dispatcher = Dispatcher::new(Arc::new(ToolRegistry::new(tools)), manager.clone(), extension.clone())
            .with_metrics(metrics.clone());
        Self {
            browser,
            extension,
            manager,
            scopes: ScopeManager::new(ScopeConfig::default()),
            metrics,
            dispatcher,
        }
    }

    pub async fn call(&self, scope: &str, tool: &str, args: Value) -> kodegen_browser_bridge::ToolOutput {
        let scope = self.scopes.resolve(Some(scope));
        self.dispatcher.dispatch(tool, args, scope).await
    }
}

pub fn error_code(output: &kodegen_browser_bridge::ToolOutput) -> Option<&str> {
    output.field("error").and_then(Value::as_str)
}
