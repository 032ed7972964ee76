//! Type into an input or choose an option of a select element

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::snapshot::parse_uid;
use crate::utils::{ToolResult, validate_interaction_timeout, with_timeout};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FillArgs {
    /// Element uid from take_snapshot
    pub uid: String,
    /// Text to enter, or the value/label of the option to select
    pub value: String,
    /// Timeout in milliseconds (default 5000, max 30000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub include_snapshot: bool,
}

#[derive(Clone, Default)]
pub struct FillTool;

impl CdpTool for FillTool {
    type Args = FillArgs;

    fn name() -> &'static str {
        "fill"
    }

    fn description() -> &'static str {
        "Replace the value of a text field, or pick an option of a <select>, identified by \
         uid from the latest snapshot.\n\n\
         Example: fill({\"uid\": \"1_3_7\", \"value\": \"alice@example.com\"})"
    }

    async fn execute(&self, args: FillArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let timeout = validate_interaction_timeout(args.timeout_ms, 5000)?;

        with_timeout(timeout, async {
            let element = ctx.element(&args.uid).await?;
            element.fill(&args.value).await
        })
        .await?;

        response.line(format!("Filled element {} ({} chars)", args.uid, args.value.chars().count()));
        if args.include_snapshot {
            response.include_snapshot(parse_uid(&args.uid).map(|(page, _)| page), false);
        }
        Ok(())
    }
}
