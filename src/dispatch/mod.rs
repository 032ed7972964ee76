//! Tool dispatch: validate, route to a backend, run, enrich, report.

mod context;
mod metrics;
mod registry;

pub use context::{CdpContext, ControllerContext};
pub use metrics::{InMemoryMetrics, MetricsSink, ToolMetric, TracingMetrics};
pub use registry::{
    CdpTool, ControllerTool, ToolDefinition, ToolHandler, ToolKind, ToolRegistry, parse_args,
};

use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::controller::{ActionExecutor, BoundExecutor};
use crate::enrichment::enrich;
use crate::manager::BrowserManager;
use crate::pages::StableId;
use crate::response::{CdpResponse, ControllerResponse, ToolOutput};
use crate::scope::ScopeHandle;
use crate::utils::constants::TAB_ID_ARG;
use crate::utils::{ToolError, ToolResult};

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    manager: Arc<BrowserManager>,
    executor: Arc<dyn ActionExecutor>,
    metrics: Arc<dyn MetricsSink>,
    action_timeout: Duration,
    serialize_calls: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        manager: Arc<BrowserManager>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            registry,
            manager,
            executor,
            metrics: Arc::new(TracingMetrics),
            action_timeout: Duration::from_millis(15_000),
            serialize_calls: true,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Run calls of one scope one at a time
    pub fn with_serialized_scopes(mut self, serialize: bool) -> Self {
        self.serialize_calls = serialize;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<BrowserManager> {
        &self.manager
    }

    /// Run one tool call. Never fails: every error, including a handler
    /// panic, comes back as an `isError` result.
    pub async fn dispatch(&self, name: &str, arguments: Value, scope: Arc<ScopeHandle>) -> ToolOutput {
        let mut metric = CallMetric::start(self.metrics.as_ref(), name);

        let outcome = match self.registry.get(name) {
            None => Err(ToolError::UnknownTool(name.to_string())),
            Some(definition) => AssertUnwindSafe(self.run(definition, arguments, &scope))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ToolError::Internal(format!(
                        "tool '{}' panicked: {}",
                        name,
                        panic_message(panic.as_ref())
                    )))
                }),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                match &err {
                    ToolError::Validation(_) | ToolError::StaleHandle(_) | ToolError::StaleElementReference(_) => {
                        debug!("Tool {} rejected: {}", name, err)
                    }
                    _ => warn!("Tool {} failed: {}", name, err),
                }
                ToolOutput::error(&err)
            }
        };

        metric.success = !output.is_error;
        output
    }

    async fn run(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        scope: &Arc<ScopeHandle>,
    ) -> ToolResult<ToolOutput> {
        let _turn = match self.serialize_calls {
            true => Some(scope.enter().await),
            false => None,
        };

        match &definition.handler {
            ToolHandler::RemoteDebug(tool) => {
                let (arguments, tab) = split_tab_id(arguments)?;
                let call = tool.clone().bind(arguments)?;
                let page = self.route(scope, tab).await?;

                let ctx = CdpContext::new(scope.clone(), self.manager.clone(), page);
                let mut response = CdpResponse::new();
                let result = call.run(&mut response, &ctx).await;
                self.sync_dialog(&ctx).await;
                result?;

                let (mut builder, intents) = response.into_parts();
                enrich(&ctx, intents, &mut builder).await;
                Ok(builder.finish())
            }
            ToolHandler::Controller(tool) => {
                let call = tool.clone().bind(arguments)?;
                let window = scope.state().await.window_id;
                let ctx = ControllerContext::new(
                    scope.clone(),
                    BoundExecutor::new(self.executor.clone(), window, self.action_timeout),
                );
                let mut response = ControllerResponse::new();
                call.run(&mut response, &ctx).await?;
                Ok(response.into_builder().finish())
            }
        }
    }

    /// Explicit `tabId`, then the scope's selection, then the first open page
    async fn route(&self, scope: &ScopeHandle, tab: Option<StableId>) -> ToolResult<Option<StableId>> {
        let pages = self.manager.list_pages().await?;
        if let Some(tab) = tab {
            self.manager.pages().resolve(tab)?;
            return Ok(Some(tab));
        }
        let selected = scope.state().await.selected_page;
        if let Some(selected) = selected
            && self.manager.pages().is_live(selected)
        {
            return Ok(Some(selected));
        }
        Ok(pages.first().map(|p| p.stable_id))
    }

    /// Mirror the routed page's open dialog into the scope
    async fn sync_dialog(&self, ctx: &CdpContext) {
        let Ok(page) = ctx.page_id() else { return };
        let Some(collector) = self.manager.collector(page) else { return };
        let dialog = collector.dialog();
        let mut state = ctx.state().await;
        match dialog {
            Some(dialog) => state.pending_dialog = Some(dialog),
            None => {
                if state.pending_dialog.as_ref().is_some_and(|d| d.page_id == page) {
                    state.pending_dialog = None;
                }
            }
        }
    }
}

/// Records one call's metric when dropped, so a call whose future is
/// cancelled mid-flight is still measured (as a failure).
struct CallMetric<'a> {
    sink: &'a dyn MetricsSink,
    tool: &'a str,
    started: Instant,
    success: bool,
}

impl<'a> CallMetric<'a> {
    fn start(sink: &'a dyn MetricsSink, tool: &'a str) -> Self {
        Self {
            sink,
            tool,
            started: Instant::now(),
            success: false,
        }
    }
}

impl Drop for CallMetric<'_> {
    fn drop(&mut self) {
        self.sink.record(ToolMetric {
            tool: self.tool.to_string(),
            duration: self.started.elapsed(),
            success: self.success,
        });
    }
}

/// Remove and coerce the routing argument
fn split_tab_id(arguments: Value) -> ToolResult<(Value, Option<StableId>)> {
    let mut map = match arguments {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(ToolError::validation(format!(
                "arguments must be an object, got {}",
                other
            )));
        }
    };

    let tab = match map.remove(TAB_ID_ARG) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(coerce_tab_id(&raw)?),
    };
    Ok((Value::Object(map), tab))
}

fn coerce_tab_id(raw: &Value) -> ToolResult<StableId> {
    let number = match raw {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    number
        .filter(|n| *n > 0)
        .and_then(|n| StableId::try_from(n).ok())
        .ok_or_else(|| ToolError::validation(format!("{} must be a positive page id, got {}", TAB_ID_ARG, raw)))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
