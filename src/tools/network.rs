//! Network requests collected for a page since its last navigation

use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListNetworkRequestsArgs {
    /// Most recent requests to return (default 50)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only these resource types, e.g. ["Document", "XHR", "Fetch"]
    #[serde(default)]
    pub resource_types: Option<Vec<String>>,
    /// Only requests that failed or returned a 4xx/5xx status
    #[serde(default)]
    pub failed_only: bool,
}

#[derive(Clone, Default)]
pub struct ListNetworkRequestsTool;

impl CdpTool for ListNetworkRequestsTool {
    type Args = ListNetworkRequestsArgs;

    fn name() -> &'static str {
        "list_network_requests"
    }

    fn description() -> &'static str {
        "List network requests made by the selected page since it last navigated."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, args: ListNetworkRequestsArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let limit = args.limit.unwrap_or(50);
        if limit == 0 {
            return Err(ToolError::validation("limit must be at least 1"));
        }

        let page = ctx.page_id()?;
        let mut requests = ctx.collector_for(page).await?.network_requests();
        if let Some(types) = &args.resource_types {
            requests.retain(|r| types.iter().any(|t| t.eq_ignore_ascii_case(&r.resource_type)));
        }
        if args.failed_only {
            requests.retain(|r| r.failure.is_some() || r.status.is_some_and(|s| s >= 400));
        }
        let total = requests.len();
        if total > limit {
            requests.drain(..total - limit);
        }

        response.line(format!("{} of {} network requests on page {}", requests.len(), total, page));
        for request in &requests {
            response.line(request.summary());
        }
        response.set("networkRequests", &requests);
        Ok(())
    }
}
