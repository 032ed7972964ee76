//! Accept or dismiss a JavaScript dialog

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DialogAction {
    Accept,
    Dismiss,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HandleDialogArgs {
    pub action: DialogAction,
    /// Text to enter into a prompt() dialog before accepting
    #[serde(default)]
    pub prompt_text: Option<String>,
}

#[derive(Clone, Default)]
pub struct HandleDialogTool;

impl CdpTool for HandleDialogTool {
    type Args = HandleDialogArgs;

    fn name() -> &'static str {
        "handle_dialog"
    }

    fn description() -> &'static str {
        "Accept or dismiss the alert, confirm, prompt or beforeunload dialog open on a page."
    }

    async fn execute(&self, args: HandleDialogArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        // The scope remembers which page its dialog opened on
        let pending = ctx.state().await.pending_dialog.clone();
        let page = match &pending {
            Some(dialog) => dialog.page_id,
            None => ctx.page_id()?,
        };
        let collector = ctx.collector_for(page).await?;
        let dialog = collector
            .dialog()
            .or(pending)
            .ok_or_else(|| ToolError::validation("No open dialog to handle"))?;

        let mut params = json!({ "accept": args.action == DialogAction::Accept });
        if let Some(text) = &args.prompt_text {
            params["promptText"] = json!(text);
        }
        ctx.session_for(page)
            .await?
            .send("Page.handleJavaScriptDialog", params)
            .await?;

        collector.clear_dialog();
        ctx.state().await.pending_dialog = None;

        let verb = match args.action {
            DialogAction::Accept => "Accepted",
            DialogAction::Dismiss => "Dismissed",
        };
        response.line(format!("{} {} dialog: {}", verb, dialog.dialog_type, dialog.message));
        response.set("dialog", &dialog);
        Ok(())
    }
}
