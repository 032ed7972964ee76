//! Page management tools: list, select, open and close pages

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::navigate::{refresh_page_info, validate_url, wait_until_ready};
use crate::dispatch::{CdpContext, CdpTool};
use crate::pages::StableId;
use crate::response::CdpResponse;
use crate::utils::{ToolResult, validate_navigation_timeout};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPagesArgs {}

#[derive(Clone, Default)]
pub struct ListPagesTool;

impl CdpTool for ListPagesTool {
    type Args = ListPagesArgs;

    fn name() -> &'static str {
        "list_pages"
    }

    fn description() -> &'static str {
        "List the pages open in the browser with their ids. Page ids are stable for the \
         life of a page and are used as tabId by every other page tool."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, _args: ListPagesArgs, response: &mut CdpResponse, _ctx: &CdpContext) -> ToolResult<()> {
        response.include_pages();
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectPageArgs {
    /// Page id from list_pages
    pub page_id: StableId,
    /// Bring the page to the front (default true)
    #[serde(default)]
    pub bring_to_front: Option<bool>,
}

#[derive(Clone, Default)]
pub struct SelectPageTool;

impl CdpTool for SelectPageTool {
    type Args = SelectPageArgs;

    fn name() -> &'static str {
        "select_page"
    }

    fn description() -> &'static str {
        "Select the page that later calls in this session act on when they pass no tabId."
    }

    async fn execute(&self, args: SelectPageArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        ctx.manager().pages().resolve(args.page_id)?;
        ctx.state().await.selected_page = Some(args.page_id);
        ctx.retarget(args.page_id);

        if args.bring_to_front.unwrap_or(true) {
            ctx.session()
                .await?
                .send("Page.bringToFront", json!({}))
                .await?;
        }

        response.line(format!("Selected page {}", args.page_id));
        response.set("selectedPage", args.page_id);
        response.include_pages();
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPageArgs {
    /// URL to open
    pub url: String,
    /// Load timeout in milliseconds (default 30000, max 300000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Default)]
pub struct NewPageTool;

impl CdpTool for NewPageTool {
    type Args = NewPageArgs;

    fn name() -> &'static str {
        "new_page"
    }

    fn description() -> &'static str {
        "Open a new page at a URL and select it for this session."
    }

    async fn execute(&self, args: NewPageArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        validate_url(&args.url)?;
        let timeout = validate_navigation_timeout(args.timeout_ms, 30_000)?;

        let page = ctx.manager().new_page(&args.url).await?;
        ctx.state().await.selected_page = Some(page);
        ctx.retarget(page);

        let session = ctx.session().await?;
        wait_until_ready(&session, timeout).await?;
        refresh_page_info(ctx, page, &session).await;

        response.line(format!("Opened page {} at {}", page, args.url));
        response.set("pageId", page);
        response.include_pages();
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClosePageArgs {
    /// Page id from list_pages
    pub page_id: StableId,
}

#[derive(Clone, Default)]
pub struct ClosePageTool;

impl CdpTool for ClosePageTool {
    type Args = ClosePageArgs;

    fn name() -> &'static str {
        "close_page"
    }

    fn description() -> &'static str {
        "Close a page by id. Its id and every snapshot uid issued for it become invalid."
    }

    async fn execute(&self, args: ClosePageArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        ctx.manager().close_page(args.page_id).await?;

        {
            let mut state = ctx.state().await;
            if state.selected_page == Some(args.page_id) {
                state.selected_page = None;
            }
        }
        if ctx.page_id().ok() == Some(args.page_id) {
            if let Some(next) = ctx.manager().pages().first_live() {
                ctx.retarget(next.stable_id);
            }
        }

        response.line(format!("Closed page {}", args.page_id));
        response.include_pages();
        Ok(())
    }
}
