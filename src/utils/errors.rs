use thiserror::Error;

use crate::browser::BrowserError;
use crate::cdp::BridgeError;
use crate::controller::ControllerError;

/// Errors surfaced to the caller of a tool as an `isError` result
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    /// Malformed or out-of-range arguments; detected before any backend call.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(
        "Page {0} no longer exists. Call list_pages to get the current page ids."
    )]
    StaleHandle(u32),

    #[error(
        "Element uid '{0}' is stale: the page changed since that snapshot was taken. \
         Call take_snapshot and use a uid from the new snapshot."
    )]
    StaleElementReference(String),

    #[error("No pages available. Open one with new_page first.")]
    NoPages,

    #[error("{0}")]
    BackendAction(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ToolError::Validation(msg.into())
    }

    pub fn action(msg: impl Into<String>) -> Self {
        ToolError::BackendAction(msg.into())
    }

    /// Stable machine-readable code placed in the structured content of error results
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "validation_error",
            ToolError::BackendUnavailable(_) => "backend_unavailable",
            ToolError::StaleHandle(_) => "stale_handle",
            ToolError::StaleElementReference(_) => "stale_element_reference",
            ToolError::NoPages => "no_pages",
            ToolError::BackendAction(_) => "backend_action_failure",
            ToolError::Timeout(_) => "timeout",
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::Internal(_) => "internal_error",
        }
    }
}

impl From<BrowserError> for ToolError {
    fn from(err: BrowserError) -> Self {
        ToolError::BackendUnavailable(format!(
            "{}. Check that Chrome/Chromium is installed (or set CHROMIUM_PATH), \
             or point browser.endpoint at a running browser started with \
             --remote-debugging-port.",
            err
        ))
    }
}

impl From<BridgeError> for ToolError {
    fn from(err: BridgeError) -> Self {
        ToolError::Internal(err.to_string())
    }
}

impl From<ControllerError> for ToolError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::NotConnected => ToolError::BackendUnavailable(
                "Browser extension is not connected. Make sure the extension is installed \
                 and enabled, and that controller.listen is configured."
                    .into(),
            ),
            ControllerError::Timeout(ms) => ToolError::Timeout(ms),
            other => ToolError::BackendAction(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::Internal(format!("JSON error: {}", err))
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
