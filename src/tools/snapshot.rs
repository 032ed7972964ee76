//! Accessibility snapshot capture

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::utils::ToolResult;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TakeSnapshotArgs {
    /// Include every node with its nesting instead of only interactive elements
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Clone, Default)]
pub struct TakeSnapshotTool;

impl CdpTool for TakeSnapshotTool {
    type Args = TakeSnapshotArgs;

    fn name() -> &'static str {
        "take_snapshot"
    }

    fn description() -> &'static str {
        "Capture a text snapshot of the page's accessibility tree. Every element gets a uid \
         that click, fill, hover, scroll and take_screenshot accept. Uids are only valid \
         until the next snapshot of the same page."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, args: TakeSnapshotArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let page = ctx.page_id()?;
        response.include_snapshot(Some(page), args.verbose);
        Ok(())
    }
}
