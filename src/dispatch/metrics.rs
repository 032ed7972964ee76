//! Per-call tool metrics

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMetric {
    pub tool: String,
    pub duration: Duration,
    pub success: bool,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: ToolMetric);
}

/// Logs each call as a structured event
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, metric: ToolMetric) {
        info!(
            tool = %metric.tool,
            duration_ms = metric.duration.as_millis() as u64,
            success = metric.success,
            "tool call finished"
        );
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    records: Mutex<Vec<ToolMetric>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ToolMetric> {
        self.records.lock().clone()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.records.lock().iter().filter(|m| m.tool == tool).count()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, metric: ToolMetric) {
        self.records.lock().push(metric);
    }
}
