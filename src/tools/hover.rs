//! Hover over an element from the latest snapshot

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::snapshot::parse_uid;
use crate::utils::{ToolResult, validate_interaction_timeout, with_timeout};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HoverArgs {
    /// Element uid from take_snapshot
    pub uid: String,
    /// Timeout in milliseconds (default 5000, max 30000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub include_snapshot: bool,
}

#[derive(Clone, Default)]
pub struct HoverTool;

impl CdpTool for HoverTool {
    type Args = HoverArgs;

    fn name() -> &'static str {
        "hover"
    }

    fn description() -> &'static str {
        "Move the mouse over the element with the given uid from the latest snapshot."
    }

    async fn execute(&self, args: HoverArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let timeout = validate_interaction_timeout(args.timeout_ms, 5000)?;

        with_timeout(timeout, async {
            let element = ctx.element(&args.uid).await?;
            element.hover().await
        })
        .await?;

        response.line(format!("Hovered over element {}", args.uid));
        if args.include_snapshot {
            response.include_snapshot(parse_uid(&args.uid).map(|(page, _)| page), false);
        }
        Ok(())
    }
}
