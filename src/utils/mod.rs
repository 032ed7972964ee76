pub mod constants;
mod errors;
mod timeout;

pub use errors::{ToolError, ToolResult};
pub use timeout::{validate_interaction_timeout, validate_navigation_timeout, with_timeout};
