//! Performance trace recording with a short Web Vitals summary

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

use super::navigate::reload_page;
use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::scope::{ActiveTrace, TraceRecord};
use crate::utils::{ToolError, ToolResult};

const TRACE_CATEGORIES: &[&str] = &[
    "-*",
    "blink.console",
    "blink.user_timing",
    "devtools.timeline",
    "disabled-by-default-devtools.screenshot",
    "disabled-by-default-devtools.timeline",
    "disabled-by-default-devtools.timeline.frame",
    "disabled-by-default-devtools.timeline.stack",
    "latencyInfo",
    "loading",
    "navigation",
    "v8.execute",
];

/// How long to wait for the browser to flush a stopped trace
const TRACE_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_contentful_paint_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largest_contentful_paint_ms: Option<f64>,
}

/// Pull FCP and the last LCP candidate out of raw trace events.
///
/// Trace timestamps are microseconds; paint marks are reported relative to the
/// latest `navigationStart` before them.
pub fn summarize(events: &[Value]) -> TraceSummary {
    let navigation_start = marks(events, "navigationStart").reduce(f64::max);
    let since_start = |t: f64| navigation_start.map(|start| (t - start) / 1000.0);

    TraceSummary {
        event_count: events.len(),
        first_contentful_paint_ms: marks(events, "firstContentfulPaint").last().and_then(since_start),
        largest_contentful_paint_ms: marks(events, "largestContentfulPaint::Candidate")
            .last()
            .and_then(since_start),
    }
}

fn marks<'a>(events: &'a [Value], name: &'a str) -> impl Iterator<Item = f64> + 'a {
    events
        .iter()
        .filter(move |e| e.get("name").and_then(Value::as_str) == Some(name))
        .filter_map(|e| e.get("ts").and_then(Value::as_f64))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartTraceArgs {
    /// Reload the page once recording has started
    #[serde(default)]
    pub reload: bool,
}

#[derive(Clone, Default)]
pub struct PerformanceStartTraceTool;

impl CdpTool for PerformanceStartTraceTool {
    type Args = StartTraceArgs;

    fn name() -> &'static str {
        "performance_start_trace"
    }

    fn description() -> &'static str {
        "Start recording a performance trace of the selected page. Stop it with \
         performance_stop_trace to get paint timings."
    }

    async fn execute(&self, args: StartTraceArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        if let Some(active) = &ctx.state().await.active_trace {
            return Err(ToolError::validation(format!(
                "A trace is already recording on page {}; stop it first",
                active.page_id
            )));
        }

        let page = ctx.page_id()?;
        let attached = ctx.attached().await?;
        attached.collector.begin_trace();
        attached
            .session
            .send(
                "Tracing.start",
                json!({
                    "transferMode": "ReportEvents",
                    "traceConfig": { "includedCategories": TRACE_CATEGORIES },
                }),
            )
            .await?;

        ctx.state().await.active_trace = Some(ActiveTrace {
            page_id: page,
            started_at: Utc::now(),
        });
        info!("Started performance trace on page {}", page);

        if args.reload {
            reload_page(&attached.session, RELOAD_TIMEOUT).await?;
        }

        response.line(format!("Recording a performance trace on page {}", page));
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StopTraceArgs {}

#[derive(Clone, Default)]
pub struct PerformanceStopTraceTool;

impl CdpTool for PerformanceStopTraceTool {
    type Args = StopTraceArgs;

    fn name() -> &'static str {
        "performance_stop_trace"
    }

    fn description() -> &'static str {
        "Stop the running performance trace and summarize it."
    }

    async fn execute(&self, _args: StopTraceArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let active = ctx
            .state()
            .await
            .active_trace
            .take()
            .ok_or_else(|| ToolError::validation("No performance trace is recording"))?;

        let attached = ctx.manager().attach(active.page_id).await?;
        attached.session.send("Tracing.end", json!({})).await?;
        let events = attached
            .collector
            .finish_trace(TRACE_FLUSH_TIMEOUT)
            .await
            .ok_or(ToolError::Timeout(TRACE_FLUSH_TIMEOUT.as_millis() as u64))?;

        let summary = summarize(&events);
        ctx.state().await.traces.push(TraceRecord {
            page_id: active.page_id,
            started_at: active.started_at,
            finished_at: Utc::now(),
            event_count: events.len(),
            events,
        });

        response.line(format!(
            "Recorded {} trace events on page {}",
            summary.event_count, active.page_id
        ));
        if let Some(fcp) = summary.first_contentful_paint_ms {
            response.line(format!("First Contentful Paint: {:.0} ms", fcp));
        }
        if let Some(lcp) = summary.largest_contentful_paint_ms {
            response.line(format!("Largest Contentful Paint: {:.0} ms", lcp));
        }
        response.set("trace", &summary);
        Ok(())
    }
}
