//! Screenshot capture of a page or a single element

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{CdpContext, CdpTool};
use crate::response::{CdpResponse, ImageFormat};
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TakeScreenshotArgs {
    /// png (default), jpeg or webp
    #[serde(default)]
    pub format: Option<String>,
    /// Capture the whole scrollable page instead of the viewport
    #[serde(default)]
    pub full_page: bool,
    /// Element uid to capture; omit for the page
    #[serde(default)]
    pub uid: Option<String>,
    /// Compression quality 0-100 for jpeg and webp
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Clone, Default)]
pub struct TakeScreenshotTool;

impl CdpTool for TakeScreenshotTool {
    type Args = TakeScreenshotArgs;

    fn name() -> &'static str {
        "take_screenshot"
    }

    fn description() -> &'static str {
        "Take a screenshot of the selected page, the full scrollable page, or one element \
         identified by uid. The image is returned inline."
    }

    fn read_only() -> bool {
        true
    }

    async fn execute(&self, args: TakeScreenshotArgs, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let format = ImageFormat::parse(args.format.as_deref())?;
        if let Some(quality) = args.quality {
            if format == ImageFormat::Png {
                return Err(ToolError::validation("quality is only supported for jpeg and webp"));
            }
            if quality > 100 {
                return Err(ToolError::validation(format!("quality must be 0-100, got {}", quality)));
            }
        }
        if args.full_page && args.uid.is_some() {
            return Err(ToolError::validation("fullPage cannot be combined with uid"));
        }

        let mut params = json!({ "format": format.as_str() });
        if let Some(quality) = args.quality {
            params["quality"] = json!(quality);
        }

        let session = match &args.uid {
            Some(uid) => {
                let element = ctx.element(uid).await?;
                element.scroll_into_view().await?;
                let rect = element.bounds().await?;
                params["clip"] = json!({
                    "x": rect.x,
                    "y": rect.y,
                    "width": rect.width,
                    "height": rect.height,
                    "scale": 1,
                });
                let page = ctx.manager().snapshots().resolve(uid)?.page_id;
                ctx.session_for(page).await?
            }
            None => {
                if args.full_page {
                    params["captureBeyondViewport"] = json!(true);
                }
                ctx.session().await?
            }
        };

        let shot = session.send("Page.captureScreenshot", params).await?;
        let bytes = shot
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::action("Page.captureScreenshot returned no data"))
            .and_then(|data| {
                BASE64
                    .decode(data)
                    .map_err(|e| ToolError::action(format!("Invalid screenshot data: {}", e)))
            })?;

        let subject = match &args.uid {
            Some(uid) => format!("element {}", uid),
            None if args.full_page => "full page".to_string(),
            None => "viewport".to_string(),
        };
        response.line(format!("Took a {} screenshot of the {}", format.as_str(), subject));
        response.set("format", format);
        response.set("bytes", bytes.len());
        response.image(&bytes, format.mime_type());
        Ok(())
    }
}
