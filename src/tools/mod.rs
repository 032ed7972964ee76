//! Browser tool implementations

mod click;
mod console;
mod controller;
mod dialog;
mod emulation;
mod evaluate;
mod fill;
mod hover;
mod navigate;
mod network;
mod pages;
mod performance;
mod screenshot;
mod scroll;
mod snapshot;

pub use click::ClickTool;
pub use console::ListConsoleMessagesTool;
pub use controller::{GetBookmarksTool, ListExtensionsTool, ListTabsTool, SearchHistoryTool, SwitchTabTool};
pub use dialog::HandleDialogTool;
pub use emulation::{EmulateTool, GetEmulationTool, NO_EMULATION};
pub use evaluate::EvaluateScriptTool;
pub use fill::FillTool;
pub use hover::HoverTool;
pub use navigate::NavigatePageTool;
pub use network::ListNetworkRequestsTool;
pub use pages::{ClosePageTool, ListPagesTool, NewPageTool, SelectPageTool};
pub use performance::{PerformanceStartTraceTool, PerformanceStopTraceTool, TraceSummary, summarize};
pub use screenshot::TakeScreenshotTool;
pub use scroll::ScrollTool;
pub use snapshot::TakeSnapshotTool;

use crate::dispatch::{ToolDefinition, ToolRegistry};

/// Every tool the server exposes, in listing order
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::remote_debug(ListPagesTool),
        ToolDefinition::remote_debug(SelectPageTool),
        ToolDefinition::remote_debug(NewPageTool),
        ToolDefinition::remote_debug(ClosePageTool),
        ToolDefinition::remote_debug(NavigatePageTool),
        ToolDefinition::remote_debug(TakeSnapshotTool),
        ToolDefinition::remote_debug(ClickTool),
        ToolDefinition::remote_debug(FillTool),
        ToolDefinition::remote_debug(HoverTool),
        ToolDefinition::remote_debug(ScrollTool),
        ToolDefinition::remote_debug(TakeScreenshotTool),
        ToolDefinition::remote_debug(EmulateTool),
        ToolDefinition::remote_debug(GetEmulationTool),
        ToolDefinition::remote_debug(HandleDialogTool),
        ToolDefinition::remote_debug(ListConsoleMessagesTool),
        ToolDefinition::remote_debug(ListNetworkRequestsTool),
        ToolDefinition::remote_debug(PerformanceStartTraceTool),
        ToolDefinition::remote_debug(PerformanceStopTraceTool),
        ToolDefinition::remote_debug(EvaluateScriptTool),
        ToolDefinition::controller(ListTabsTool),
        ToolDefinition::controller(SwitchTabTool),
        ToolDefinition::controller(GetBookmarksTool),
        ToolDefinition::controller(SearchHistoryTool),
        ToolDefinition::controller(ListExtensionsTool),
    ]
}

pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new(all_tools())
}
