//! Network, CPU, viewport, user agent and color scheme emulation.
//!
//! Overrides are applied to the routed page and remembered in the calling
//! scope, so `get_emulation` in one scope never sees another scope's settings.

use chromiumoxide_cdp::cdp::browser_protocol::emulation::{
    ClearDeviceMetricsOverrideParams, SetCpuThrottlingRateParams, SetDeviceMetricsOverrideParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide_cdp::cdp::browser_protocol::network::EmulateNetworkConditionsParams;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::cdp::PageSession;
use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::scope::{ColorScheme, EmulationSettings, NetworkConditions, Viewport};
use crate::utils::{ToolError, ToolResult};

/// Network condition name that removes throttling
pub const NO_EMULATION: &str = "No emulation";

const MAX_VIEWPORT_EDGE: u32 = 10_000;

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmulateArgs {
    /// "No emulation", "Offline", "Slow 3G", "Fast 3G", "Slow 4G" or "Fast 4G"
    #[serde(default)]
    pub network_conditions: Option<String>,
    /// CPU slowdown factor from 1 (none) to 20
    #[serde(default)]
    pub cpu_throttling_rate: Option<f64>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// User agent override; empty string restores the browser's own
    #[serde(default)]
    pub user_agent: Option<String>,
    /// dark, light or auto
    #[serde(default)]
    pub color_scheme: Option<ColorScheme>,
    /// Clear every override before applying the others
    #[serde(default)]
    pub reset: bool,
}

/// Arguments after validation, in the form they are applied
#[derive(Debug, Default)]
struct Plan {
    reset: bool,
    network: Option<Option<NetworkConditions>>,
    cpu: Option<f64>,
    viewport: Option<Viewport>,
    user_agent: Option<String>,
    color_scheme: Option<ColorScheme>,
}

impl Plan {
    fn from_args(args: EmulateArgs) -> ToolResult<Self> {
        let network = match args.network_conditions.as_deref() {
            None => None,
            Some(NO_EMULATION) => Some(None),
            Some(name) => Some(Some(NetworkConditions::preset(name).ok_or_else(|| {
                ToolError::validation(format!(
                    "Unknown network condition '{}'. Use one of: {}, {}",
                    name,
                    NO_EMULATION,
                    NetworkConditions::PRESETS.join(", ")
                ))
            })?)),
        };

        if let Some(rate) = args.cpu_throttling_rate
            && !(1.0..=20.0).contains(&rate)
        {
            return Err(ToolError::validation(format!(
                "cpuThrottlingRate must be between 1 and 20, got {}",
                rate
            )));
        }

        if let Some(viewport) = &args.viewport {
            let edges = [viewport.width, viewport.height];
            if edges.iter().any(|e| *e == 0 || *e > MAX_VIEWPORT_EDGE) {
                return Err(ToolError::validation(format!(
                    "viewport width and height must be 1-{}, got {}x{}",
                    MAX_VIEWPORT_EDGE, viewport.width, viewport.height
                )));
            }
            if !(viewport.device_scale_factor > 0.0 && viewport.device_scale_factor <= 10.0) {
                return Err(ToolError::validation(format!(
                    "viewport deviceScaleFactor must be in (0, 10], got {}",
                    viewport.device_scale_factor
                )));
            }
        }

        let plan = Plan {
            reset: args.reset,
            network,
            cpu: args.cpu_throttling_rate,
            viewport: args.viewport,
            user_agent: args.user_agent,
            color_scheme: args.color_scheme,
        };
        if !plan.reset
            && plan.network.is_none()
            && plan.cpu.is_none()
            && plan.viewport.is_none()
            && plan.user_agent.is_none()
            && plan.color_scheme.is_none()
        {
            return Err(ToolError::validation("Nothing to emulate: pass at least one setting or reset"));
        }
        Ok(plan)
    }

    /// Settings the scope holds once the plan is applied
    fn apply_to(&self, current: &EmulationSettings) -> EmulationSettings {
        let mut next = match self.reset {
            true => EmulationSettings::default(),
            false => current.clone(),
        };
        if let Some(network) = &self.network {
            next.network = network.clone();
        }
        if let Some(rate) = self.cpu {
            next.cpu_throttling_rate = (rate > 1.0).then_some(rate);
        }
        if let Some(viewport) = self.viewport {
            next.viewport = Some(viewport);
        }
        if let Some(ua) = &self.user_agent {
            next.user_agent = (!ua.is_empty()).then(|| ua.clone());
        }
        if let Some(scheme) = self.color_scheme {
            next.color_scheme = (scheme != ColorScheme::Auto).then_some(scheme);
        }
        next
    }
}

async fn apply_network(session: &PageSession, network: Option<&NetworkConditions>) -> ToolResult<()> {
    let params = match network {
        Some(n) => EmulateNetworkConditionsParams::new(
            n.offline,
            n.latency_ms,
            n.download_throughput,
            n.upload_throughput,
        ),
        None => EmulateNetworkConditionsParams::new(false, 0.0, -1.0, -1.0),
    };
    session.execute(params).await?;
    Ok(())
}

async fn apply_viewport(session: &PageSession, viewport: Option<&Viewport>) -> ToolResult<()> {
    match viewport {
        Some(v) => {
            session
                .execute(SetDeviceMetricsOverrideParams::new(
                    v.width as i64,
                    v.height as i64,
                    v.device_scale_factor,
                    v.mobile,
                ))
                .await?;
        }
        None => {
            session.execute(ClearDeviceMetricsOverrideParams::default()).await?;
        }
    }
    Ok(())
}

async fn apply_color_scheme(session: &PageSession, scheme: Option<ColorScheme>) -> ToolResult<()> {
    let value = scheme.map(ColorScheme::media_value).unwrap_or("");
    session
        .send(
            "Emulation.setEmulatedMedia",
            json!({ "features": [{ "name": "prefers-color-scheme", "value": value }] }),
        )
        .await?;
    Ok(())
}

fn describe(settings: &EmulationSettings) -> Vec<String> {
    if settings.is_default() {
        return vec!["No emulation active".to_string()];
    }
    let mut lines = Vec::new();
    if let Some(network) = &settings.network {
        lines.push(format!("Network: {}", network.name));
    }
    if let Some(rate) = settings.cpu_throttling_rate {
        lines.push(format!("CPU throttling: {}x", rate));
    }
    if let Some(v) = &settings.viewport {
        lines.push(format!(
            "Viewport: {}x{} @{}x{}",
            v.width,
            v.height,
            v.device_scale_factor,
            if v.mobile { " mobile" } else { "" }
        ));
    }
    if let Some(ua) = &settings.user_agent {
        lines.push(format!("User agent: {}", ua));
    }
    if let Some(scheme) = settings.color_scheme {
        lines.push(format!("Color scheme: {}", scheme.media_value()));
    }
    lines
}

#[derive(Clone, Default)]
pub struct EmulateTool;

impl CdpTool for EmulateTool {
    type Args = EmulateArgs;

    fn name() -> &'static str {
        "emulate"
    }

    fn description() -> &'static str {
        "Emulate network conditions, CPU throttling, a viewport, a user agent or a color \
         scheme on the selected page. Settings belong to the calling session.\n\n\
         Example: emulate({\"networkConditions\": \"Slow 3G\", \"cpuThrottlingRate\": 4})"
    }

    async fn execute(&self, args: EmulateArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let plan = Plan::from_args(args)?;
        let session = ctx.session().await?;

        let current = ctx.state().await.emulation.clone();
        let next = plan.apply_to(&current);

        if plan.reset || plan.network.is_some() {
            apply_network(&session, next.network.as_ref()).await?;
        }
        if plan.reset || plan.cpu.is_some() {
            session
                .execute(SetCpuThrottlingRateParams::new(next.cpu_throttling_rate.unwrap_or(1.0)))
                .await?;
        }
        if plan.reset || plan.viewport.is_some() {
            apply_viewport(&session, next.viewport.as_ref()).await?;
        }
        if plan.reset || plan.user_agent.is_some() {
            session
                .execute(SetUserAgentOverrideParams::new(next.user_agent.clone().unwrap_or_default()))
                .await?;
        }
        if plan.reset || plan.color_scheme.is_some() {
            apply_color_scheme(&session, next.color_scheme).await?;
        }

        ctx.state().await.emulation = next.clone();

        for line in describe(&next) {
            response.line(line);
        }
        response.set("emulation", &next);
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEmulationArgs {}

#[derive(Clone, Default)]
pub struct GetEmulationTool;

impl CdpTool for GetEmulationTool {
    type Args = GetEmulationArgs;

    fn name() -> &'static str {
        "get_emulation"
    }

    fn description() -> &'static str {
        "Show the emulation settings active in the calling session."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, _args: GetEmulationArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let settings = ctx.state().await.emulation.clone();
        for line in describe(&settings) {
            response.line(line);
        }
        response.set("emulation", &settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: serde_json::Value) -> EmulateArgs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unknown_network_preset_is_rejected() {
        let err = Plan::from_args(args(json!({"networkConditions": "Dial-up"}))).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn cpu_rate_out_of_range_is_rejected() {
        for rate in [0.5, 21.0] {
            assert!(Plan::from_args(args(json!({"cpuThrottlingRate": rate}))).is_err());
        }
    }

    #[test]
    fn empty_request_is_rejected() {
        assert!(Plan::from_args(EmulateArgs::default()).is_err());
    }

    #[test]
    fn plan_merges_into_existing_settings() {
        let current = EmulationSettings {
            cpu_throttling_rate: Some(4.0),
            ..Default::default()
        };
        let plan = Plan::from_args(args(json!({"networkConditions": "Slow 3G"}))).unwrap();
        let next = plan.apply_to(&current);
        assert_eq!(next.network.as_ref().map(|n| n.name.as_str()), Some("Slow 3G"));
        assert_eq!(next.cpu_throttling_rate, Some(4.0));

        let plan = Plan::from_args(args(json!({"networkConditions": "No emulation", "cpuThrottlingRate": 1}))).unwrap();
        assert!(plan.apply_to(&next).is_default());
    }

    #[test]
    fn reset_clears_before_applying() {
        let current = EmulationSettings {
            user_agent: Some("bot".into()),
            ..Default::default()
        };
        let plan = Plan::from_args(args(json!({"reset": true, "colorScheme": "dark"}))).unwrap();
        let next = plan.apply_to(&current);
        assert_eq!(next.user_agent, None);
        assert_eq!(next.color_scheme, Some(ColorScheme::Dark));
    }

    #[test]
    fn describes_default_settings() {
        assert_eq!(describe(&EmulationSettings::default()), vec!["No emulation active"]);
    }
}
