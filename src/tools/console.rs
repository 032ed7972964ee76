//! Console messages collected for a page since its last navigation

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListConsoleMessagesArgs {
    /// Most recent messages to return (default 50)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only these levels, e.g. ["error", "warning"]
    #[serde(default)]
    pub levels: Option<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct ListConsoleMessagesTool;

impl CdpTool for ListConsoleMessagesTool {
    type Args = ListConsoleMessagesArgs;

    fn name() -> &'static str {
        "list_console_messages"
    }

    fn description() -> &'static str {
        "List console messages and uncaught exceptions logged by the selected page since it \
         last navigated."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, args: ListConsoleMessagesArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let limit = args.limit.unwrap_or(50);
        if limit == 0 {
            return Err(ToolError::validation("limit must be at least 1"));
        }

        let page = ctx.page_id()?;
        let mut messages = ctx.collector_for(page).await?.console_messages();
        if let Some(levels) = &args.levels {
            messages.retain(|m| levels.iter().any(|l| l.eq_ignore_ascii_case(&m.level)));
        }
        let total = messages.len();
        if total > limit {
            messages.drain(..total - limit);
        }

        response.line(format!("{} of {} console messages on page {}", messages.len(), total, page));
        for message in &messages {
            response.line(format!("[{}] {}", message.level, message.text));
        }
        response.set("consoleMessages", &messages);
        Ok(())
    }
}
