//! Scroll the page or an element

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::CdpResponse;
use crate::snapshot::parse_uid;
use crate::utils::{ToolError, ToolResult, validate_interaction_timeout, with_timeout};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
    Left,
    Right,
}

impl ScrollDirection {
    fn delta(self, amount: f64) -> (f64, f64) {
        match self {
            ScrollDirection::Down => (0.0, amount),
            ScrollDirection::Up => (0.0, -amount),
            ScrollDirection::Right => (amount, 0.0),
            ScrollDirection::Left => (-amount, 0.0),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrollArgs {
    /// Element uid to scroll within; omit to scroll the window
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub direction: ScrollDirection,
    /// Pixels to scroll (default 500)
    #[serde(default)]
    pub amount: Option<f64>,
    /// Timeout in milliseconds (default 5000, max 30000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub include_snapshot: bool,
}

#[derive(Clone, Default)]
pub struct ScrollTool;

impl CdpTool for ScrollTool {
    type Args = ScrollArgs;

    fn name() -> &'static str {
        "scroll"
    }

    fn description() -> &'static str {
        "Scroll the window, or the element with the given uid, up, down, left or right \
         by a number of pixels (default 500)."
    }

    async fn execute(&self, args: ScrollArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let timeout = validate_interaction_timeout(args.timeout_ms, 5000)?;
        let amount = args.amount.unwrap_or(500.0);
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ToolError::validation(format!(
                "amount must be a positive number of pixels, got {}",
                amount
            )));
        }
        let (dx, dy) = args.direction.delta(amount);

        match &args.uid {
            Some(uid) => {
                with_timeout(timeout, async {
                    let element = ctx.element(uid).await?;
                    element.scroll_by(dx, dy).await
                })
                .await?;
                response.line(format!("Scrolled element {} by ({}, {})", uid, dx, dy));
            }
            None => {
                let session = ctx.session().await?.with_deadline(timeout);
                session
                    .send(
                        "Runtime.evaluate",
                        json!({ "expression": format!("window.scrollBy({}, {})", dx, dy) }),
                    )
                    .await?;
                response.line(format!("Scrolled page {} by ({}, {})", ctx.page_id()?, dx, dy));
            }
        }

        if args.include_snapshot {
            let page = args.uid.as_deref().and_then(parse_uid).map(|(page, _)| page);
            response.include_snapshot(page, false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_maps_to_signed_delta() {
        assert_eq!(ScrollDirection::Down.delta(100.0), (0.0, 100.0));
        assert_eq!(ScrollDirection::Up.delta(100.0), (0.0, -100.0));
        assert_eq!(ScrollDirection::Left.delta(40.0), (-40.0, 0.0));
    }
}
