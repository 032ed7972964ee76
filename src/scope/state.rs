//! Per-scope mutable browser state

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pages::StableId;

/// Everything a caller scope remembers between tool calls
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub selected_page: Option<StableId>,
    pub emulation: EmulationSettings,
    pub pending_dialog: Option<DialogInfo>,
    pub active_trace: Option<ActiveTrace>,
    pub traces: Vec<TraceRecord>,
    pub extensions: Vec<ExtensionInfo>,
    /// Browser window the controller backend acts on
    pub window_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulationSettings {
    pub network: Option<NetworkConditions>,
    pub cpu_throttling_rate: Option<f64>,
    pub viewport: Option<Viewport>,
    pub user_agent: Option<String>,
    pub color_scheme: Option<ColorScheme>,
}

impl EmulationSettings {
    pub fn is_default(&self) -> bool {
        *self == EmulationSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConditions {
    pub name: String,
    pub offline: bool,
    pub latency_ms: f64,
    /// Bytes per second; -1 disables throttling
    pub download_throughput: f64,
    pub upload_throughput: f64,
}

impl NetworkConditions {
    pub const PRESETS: &'static [&'static str] =
        &["Offline", "Slow 3G", "Fast 3G", "Slow 4G", "Fast 4G"];

    /// Throughput presets matching DevTools' network throttling menu
    pub fn preset(name: &str) -> Option<Self> {
        let (offline, latency_ms, download, upload) = match name {
            "Offline" => (true, 0.0, 0.0, 0.0),
            "Slow 3G" => (false, 400.0 * 5.0, 500.0 * 1000.0 / 8.0 * 0.8, 500.0 * 1000.0 / 8.0 * 0.8),
            "Fast 3G" | "Slow 4G" => (
                false,
                150.0 * 3.75,
                1.6 * 1000.0 * 1000.0 / 8.0 * 0.9,
                750.0 * 1000.0 / 8.0 * 0.9,
            ),
            "Fast 4G" => (
                false,
                60.0 * 2.75,
                9.0 * 1000.0 * 1000.0 / 8.0 * 0.9,
                1.5 * 1000.0 * 1000.0 / 8.0 * 0.9,
            ),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            offline,
            latency_ms,
            download_throughput: download,
            upload_throughput: upload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub mobile: bool,
}

fn default_scale_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Dark,
    Light,
    Auto,
}

impl ColorScheme {
    /// Value for the `prefers-color-scheme` media feature; empty clears it
    pub fn media_value(self) -> &'static str {
        match self {
            ColorScheme::Dark => "dark",
            ColorScheme::Light => "light",
            ColorScheme::Auto => "",
        }
    }
}

/// A JavaScript dialog left open on a page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogInfo {
    pub page_id: StableId,
    pub dialog_type: String,
    pub message: String,
    pub default_prompt: Option<String>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrace {
    pub page_id: StableId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub page_id: StableId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub event_count: usize,
    #[serde(skip)]
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enabled: bool,
}
