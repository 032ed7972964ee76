//! MCP surface: tool listing and call routing over the dispatcher.

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool, ToolAnnotations,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::dispatch::{Dispatcher, ToolDefinition};
use crate::response::{ContentBlock, ToolOutput};
use crate::scope::ScopeManager;
use crate::utils::constants::SCOPE_META_KEY;

#[derive(Clone)]
pub struct BridgeServer {
    dispatcher: Arc<Dispatcher>,
    scopes: Arc<ScopeManager>,
}

impl BridgeServer {
    pub fn new(dispatcher: Arc<Dispatcher>, scopes: Arc<ScopeManager>) -> Self {
        Self { dispatcher, scopes }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Tool list as advertised to clients
    pub fn tools(&self) -> Vec<Tool> {
        self.dispatcher.registry().iter().map(to_tool).collect()
    }
}

fn to_tool(definition: &ToolDefinition) -> Tool {
    Tool::new(
        definition.name,
        definition.description,
        definition.input_schema.clone(),
    )
    .annotate(ToolAnnotations::new().read_only(definition.read_only))
}

/// Scope id carried in request metadata; strings and numbers are accepted
pub fn scope_id_from_meta(meta: &Map<String, Value>) -> Option<String> {
    match meta.get(SCOPE_META_KEY)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn to_call_result(output: ToolOutput) -> CallToolResult {
    let content: Vec<Content> = output
        .content
        .into_iter()
        .map(|block| match block {
            ContentBlock::Text { text } => Content::text(text),
            ContentBlock::Image { data, mime_type } => Content::image(data, mime_type),
        })
        .collect();

    let mut result = match output.is_error {
        true => CallToolResult::error(content),
        false => CallToolResult::success(content),
    };
    result.structured_content = output.structured_content.map(Value::Object);
    result
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Browser automation tools. Page tools act on the selected page of your \
                 session (select_page) or on the page given as tabId. Call take_snapshot \
                 to get element uids for click, fill, hover and scroll; uids go stale when \
                 the page is snapshotted again or navigates. Pass _meta.scopeId to keep \
                 state between calls."
                    .into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let scope_id = scope_id_from_meta(&context.meta);
        let scope = self.scopes.resolve(scope_id.as_deref());
        debug!(
            "call_tool {} in scope {}",
            request.name,
            scope.id().unwrap_or("<ephemeral>")
        );

        let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        let output = self
            .dispatcher
            .dispatch(&request.name, arguments, scope)
            .await;
        Ok(to_call_result(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_id_accepts_strings_and_numbers() {
        let meta = |v: Value| json!({ "scopeId": v }).as_object().cloned().unwrap();
        assert_eq!(scope_id_from_meta(&meta(json!("conv-1"))), Some("conv-1".into()));
        assert_eq!(scope_id_from_meta(&meta(json!(42))), Some("42".into()));
        assert_eq!(scope_id_from_meta(&meta(json!(null))), None);
        assert_eq!(scope_id_from_meta(&Map::new()), None);
    }

    #[test]
    fn errors_and_structured_content_survive_conversion() {
        let output = ToolOutput {
            content: vec![ContentBlock::text("boom")],
            structured_content: Some(json!({"error": "timeout"}).as_object().cloned().unwrap()),
            is_error: true,
        };
        let result = to_call_result(output);
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.structured_content, Some(json!({"error": "timeout"})));
    }
}
