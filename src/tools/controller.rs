//! Tools served by the browser extension rather than the debugging connection

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{ControllerContext, ControllerTool};
use crate::response::ControllerResponse;
use crate::scope::ExtensionInfo;
use crate::utils::{ToolError, ToolResult};

fn items(reply: &Value, key: &str) -> Vec<Value> {
    reply
        .get(key)
        .or(Some(reply))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_of<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or("")
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTabsArgs {}

#[derive(Clone, Default)]
pub struct ListTabsTool;

impl ControllerTool for ListTabsTool {
    type Args = ListTabsArgs;

    fn name() -> &'static str {
        "list_tabs"
    }

    fn description() -> &'static str {
        "List the tabs in the browser window this session controls through the extension."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, _args: ListTabsArgs, response: &mut ControllerResponse, ctx: &ControllerContext) -> ToolResult<()> {
        let reply = ctx.execute("getTabs", json!({})).await?;
        let tabs = items(&reply, "tabs");

        response.line(format!("{} tabs", tabs.len()));
        for tab in &tabs {
            let active = if tab.get("active").and_then(Value::as_bool) == Some(true) { " [active]" } else { "" };
            response.line(format!(
                "{}: {} {}{}",
                tab.get("id").map(Value::to_string).unwrap_or_default(),
                str_of(tab, "title"),
                str_of(tab, "url"),
                active
            ));
        }
        response.set("tabs", tabs);
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabArgs {
    /// Tab id from list_tabs
    pub tab_id: i64,
}

#[derive(Clone, Default)]
pub struct SwitchTabTool;

impl ControllerTool for SwitchTabTool {
    type Args = SwitchTabArgs;

    fn name() -> &'static str {
        "switch_tab"
    }

    fn description() -> &'static str {
        "Activate a tab by id. Later extension actions in this session target its window."
    }

    async fn execute(&self, args: SwitchTabArgs, response: &mut ControllerResponse, ctx: &ControllerContext) -> ToolResult<()> {
        if args.tab_id < 0 {
            return Err(ToolError::validation(format!("tabId must be non-negative, got {}", args.tab_id)));
        }
        let reply = ctx.execute("switchTab", json!({ "tabId": args.tab_id })).await?;

        if let Some(window) = reply.get("windowId").and_then(Value::as_i64) {
            ctx.state().await.window_id = Some(window);
            response.set("windowId", window);
        }
        response.line(format!("Switched to tab {}", args.tab_id));
        response.set("tabId", args.tab_id);
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetBookmarksArgs {}

#[derive(Clone, Default)]
pub struct GetBookmarksTool;

impl ControllerTool for GetBookmarksTool {
    type Args = GetBookmarksArgs;

    fn name() -> &'static str {
        "get_bookmarks"
    }

    fn description() -> &'static str {
        "Read the browser's bookmarks."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, _args: GetBookmarksArgs, response: &mut ControllerResponse, ctx: &ControllerContext) -> ToolResult<()> {
        let reply = ctx.execute("getBookmarks", json!({})).await?;
        let bookmarks = items(&reply, "bookmarks");

        response.line(format!("{} bookmarks", bookmarks.len()));
        for bookmark in &bookmarks {
            response.line(format!("{} {}", str_of(bookmark, "title"), str_of(bookmark, "url")));
        }
        response.set("bookmarks", bookmarks);
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryArgs {
    /// Text to match against visited URLs and titles
    pub query: String,
    /// Maximum entries to return (default 20, max 1000)
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Clone, Default)]
pub struct SearchHistoryTool;

impl ControllerTool for SearchHistoryTool {
    type Args = SearchHistoryArgs;

    fn name() -> &'static str {
        "search_history"
    }

    fn description() -> &'static str {
        "Search the browser's history by text."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, args: SearchHistoryArgs, response: &mut ControllerResponse, ctx: &ControllerContext) -> ToolResult<()> {
        let max_results = args.max_results.unwrap_or(20);
        if !(1..=1000).contains(&max_results) {
            return Err(ToolError::validation(format!("maxResults must be 1-1000, got {}", max_results)));
        }

        let reply = ctx
            .execute("searchHistory", json!({ "query": args.query, "maxResults": max_results }))
            .await?;
        let entries = items(&reply, "items");

        response.line(format!("{} history entries matching '{}'", entries.len(), args.query));
        for entry in &entries {
            response.line(format!("{} {}", str_of(entry, "title"), str_of(entry, "url")));
        }
        response.set("history", entries);
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListExtensionsArgs {}

#[derive(Clone, Default)]
pub struct ListExtensionsTool;

impl ControllerTool for ListExtensionsTool {
    type Args = ListExtensionsArgs;

    fn name() -> &'static str {
        "list_extensions"
    }

    fn description() -> &'static str {
        "List installed browser extensions. The inventory is remembered for this session."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, _args: ListExtensionsArgs, response: &mut ControllerResponse, ctx: &ControllerContext) -> ToolResult<()> {
        let reply = ctx.execute("getExtensions", json!({})).await?;
        let extensions: Vec<ExtensionInfo> = items(&reply, "extensions")
            .into_iter()
            .filter_map(|e| serde_json::from_value(e).ok())
            .collect();

        response.line(format!("{} extensions", extensions.len()));
        for ext in &extensions {
            let state = if ext.enabled { "enabled" } else { "disabled" };
            response.line(format!("{} {} ({}) {}", ext.name, ext.version, ext.id, state));
        }
        response.set("extensions", &extensions);
        ctx.state().await.extensions = extensions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_accept_wrapped_or_bare_arrays() {
        assert_eq!(items(&json!({"tabs": [1, 2]}), "tabs").len(), 2);
        assert_eq!(items(&json!([1, 2, 3]), "tabs").len(), 3);
        assert!(items(&json!({"other": 1}), "tabs").is_empty());
    }
}
