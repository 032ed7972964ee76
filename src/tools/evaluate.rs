//! Run a JavaScript function in the page

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::snapshot::parse_uid;
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ElementArg {
    /// Element uid from take_snapshot
    pub uid: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateScriptArgs {
    /// A JavaScript function declaration, e.g. `() => document.title` or
    /// `async (el) => el.innerText`
    pub function: String,
    /// Elements passed to the function as arguments, in order
    #[serde(default)]
    pub args: Vec<ElementArg>,
}

/// Human readable message for a `Runtime` exception
fn exception_text(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Uncaught exception")
        .to_string()
}

fn returned_value(reply: &Value) -> ToolResult<Value> {
    if let Some(details) = reply.get("exceptionDetails") {
        return Err(ToolError::action(format!("Script threw: {}", exception_text(details))));
    }
    Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

#[derive(Clone, Default)]
pub struct EvaluateScriptTool;

impl CdpTool for EvaluateScriptTool {
    type Args = EvaluateScriptArgs;

    fn name() -> &'static str {
        "evaluate_script"
    }

    fn description() -> &'static str {
        "Evaluate a JavaScript function in the selected page and return its JSON-serializable \
         result. Elements from the latest snapshot can be passed as arguments by uid.\n\n\
         Example: evaluate_script({\"function\": \"() => document.title\"})"
    }

    async fn execute(&self, args: EvaluateScriptArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        if args.function.trim().is_empty() {
            return Err(ToolError::validation("function must not be empty"));
        }

        let pages: Vec<_> = args
            .args
            .iter()
            .map(|a| {
                parse_uid(&a.uid)
                    .map(|(page, _)| page)
                    .ok_or_else(|| ToolError::validation(format!("'{}' is not a snapshot uid", a.uid)))
            })
            .collect::<ToolResult<_>>()?;
        if pages.windows(2).any(|w| w[0] != w[1]) {
            return Err(ToolError::validation("All element arguments must come from the same page"));
        }

        let reply = match pages.first() {
            None => {
                ctx.session()
                    .await?
                    .send(
                        "Runtime.evaluate",
                        json!({
                            "expression": format!("({})()", args.function),
                            "awaitPromise": true,
                            "returnByValue": true,
                        }),
                    )
                    .await?
            }
            Some(page) => {
                let mut handles = Vec::with_capacity(args.args.len());
                for arg in &args.args {
                    handles.push(ctx.element(&arg.uid).await?);
                }
                let arguments: Vec<Value> = handles
                    .iter()
                    .map(|h| json!({ "objectId": h.object_id() }))
                    .collect();
                ctx.session_for(*page)
                    .await?
                    .send(
                        "Runtime.callFunctionOn",
                        json!({
                            "functionDeclaration": args.function,
                            "objectId": handles[0].object_id(),
                            "arguments": arguments,
                            "awaitPromise": true,
                            "returnByValue": true,
                        }),
                    )
                    .await?
            }
        };

        let value = returned_value(&reply)?;
        let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        response.line("Script ran on page and returned:");
        response.line(rendered);
        response.set("result", value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceptions_become_action_errors() {
        let reply = json!({
            "result": {"type": "object", "subtype": "error"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "ReferenceError: x is not defined"}}
        });
        match returned_value(&reply) {
            Err(ToolError::BackendAction(msg)) => assert!(msg.contains("ReferenceError")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn undefined_results_are_null() {
        assert_eq!(returned_value(&json!({"result": {"type": "undefined"}})).unwrap(), Value::Null);
        assert_eq!(
            returned_value(&json!({"result": {"type": "string", "value": "Example"}})).unwrap(),
            json!("Example")
        );
    }
}
