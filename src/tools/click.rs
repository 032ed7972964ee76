//! Click an element from the latest snapshot

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::snapshot::parse_uid;
use crate::utils::{ToolResult, validate_interaction_timeout, with_timeout};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickArgs {
    /// Element uid from take_snapshot
    pub uid: String,
    /// Double-click instead of a single click
    #[serde(default)]
    pub dbl_click: bool,
    /// Timeout in milliseconds (default 5000, max 30000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Attach a fresh snapshot of the page to the response
    #[serde(default)]
    pub include_snapshot: bool,
}

#[derive(Clone, Default)]
pub struct ClickTool;

impl CdpTool for ClickTool {
    type Args = ClickArgs;

    fn name() -> &'static str {
        "click"
    }

    fn description() -> &'static str {
        "Click the element with the given uid from the latest snapshot. The element is \
         scrolled into view and clicked at its center.\n\n\
         Example: click({\"uid\": \"1_3_12\"})"
    }

    async fn execute(&self, args: ClickArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let timeout = validate_interaction_timeout(args.timeout_ms, 5000)?;

        let point = with_timeout(timeout, async {
            let element = ctx.element(&args.uid).await?;
            element.click(args.dbl_click).await
        })
        .await?;

        let verb = if args.dbl_click { "Double-clicked" } else { "Clicked" };
        response.line(format!("{} element {} at ({:.0}, {:.0})", verb, args.uid, point.x, point.y));
        response.set("uid", &args.uid);
        if args.include_snapshot {
            response.include_snapshot(parse_uid(&args.uid).map(|(page, _)| page), false);
        }
        Ok(())
    }
}
