//! Tool response accumulation and the wire result shape.
//!
//! Handlers write text lines, structured fields and images into a builder.
//! CDP handlers may additionally declare enrichment intents which are carried
//! out after the handler returns (see `enrichment`).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

use crate::pages::StableId;
use crate::utils::ToolError;

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        ContentBlock::Image {
            data: BASE64.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// Final result of one tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn error(err: &ToolError) -> Self {
        let mut structured = Map::new();
        structured.insert("error".into(), Value::String(err.code().into()));
        structured.insert("message".into(), Value::String(err.to_string()));
        Self {
            content: vec![ContentBlock::text(err.to_string())],
            structured_content: Some(structured),
            is_error: true,
        }
    }

    /// All text blocks joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::Image { .. }))
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.structured_content.as_ref()?.get(key)
    }
}

/// Output accumulated by a handler, common to both backends
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    lines: Vec<String>,
    structured: Map<String, Value>,
    blocks: Vec<ContentBlock>,
    images: Vec<ContentBlock>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    /// Set a structured-content field; values that fail to serialize become null
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        self.structured.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    pub fn image(&mut self, bytes: &[u8], mime_type: &str) -> &mut Self {
        self.images.push(ContentBlock::image(bytes, mime_type));
        self
    }

    /// Separate text block after the handler's own lines
    pub fn block(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(ContentBlock::text(text));
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.structured.get(key)
    }

    /// Assemble the result; never yields an empty content list
    pub fn finish(self) -> ToolOutput {
        let mut content = Vec::with_capacity(1 + self.blocks.len() + self.images.len());
        if !self.lines.is_empty() {
            content.push(ContentBlock::text(self.lines.join("\n")));
        }
        content.extend(self.blocks);
        content.extend(self.images);
        if content.is_empty() {
            content.push(ContentBlock::text("Success"));
        }
        ToolOutput {
            content,
            structured_content: (!self.structured.is_empty()).then_some(self.structured),
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn parse(raw: Option<&str>) -> Result<Self, ToolError> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("png") => Ok(ImageFormat::Png),
            Some("jpeg") | Some("jpg") => Ok(ImageFormat::Jpeg),
            Some("webp") => Ok(ImageFormat::Webp),
            Some(other) => Err(ToolError::validation(format!(
                "format must be png, jpeg or webp, got '{}'",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotIntent {
    pub page: Option<StableId>,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenshotIntent {
    pub page: Option<StableId>,
    pub format: ImageFormat,
    pub full_page: bool,
}

/// Deferred enrichments; declaring one twice keeps the last parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intents {
    pub snapshot: Option<SnapshotIntent>,
    pub screenshot: Option<ScreenshotIntent>,
    pub pages: bool,
    pub network_requests: Option<usize>,
    pub console_data: Option<usize>,
}

impl Intents {
    pub fn is_empty(&self) -> bool {
        *self == Intents::default()
    }
}

/// Response handed to remote-debug handlers
#[derive(Debug, Default)]
pub struct CdpResponse {
    builder: ResponseBuilder,
    intents: Intents,
}

impl CdpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_snapshot(&mut self, page: Option<StableId>, verbose: bool) -> &mut Self {
        self.intents.snapshot = Some(SnapshotIntent { page, verbose });
        self
    }

    pub fn include_screenshot(
        &mut self,
        page: Option<StableId>,
        format: ImageFormat,
        full_page: bool,
    ) -> &mut Self {
        self.intents.screenshot = Some(ScreenshotIntent {
            page,
            format,
            full_page,
        });
        self
    }

    pub fn include_pages(&mut self) -> &mut Self {
        self.intents.pages = true;
        self
    }

    pub fn include_network_requests(&mut self, limit: usize) -> &mut Self {
        self.intents.network_requests = Some(limit);
        self
    }

    pub fn include_console_data(&mut self, limit: usize) -> &mut Self {
        self.intents.console_data = Some(limit);
        self
    }

    pub fn intents(&self) -> &Intents {
        &self.intents
    }

    pub fn into_parts(self) -> (ResponseBuilder, Intents) {
        (self.builder, self.intents)
    }
}

impl Deref for CdpResponse {
    type Target = ResponseBuilder;

    fn deref(&self) -> &ResponseBuilder {
        &self.builder
    }
}

impl DerefMut for CdpResponse {
    fn deref_mut(&mut self) -> &mut ResponseBuilder {
        &mut self.builder
    }
}

/// Response handed to controller handlers; no enrichment
#[derive(Debug, Default)]
pub struct ControllerResponse {
    builder: ResponseBuilder,
}

impl ControllerResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_builder(self) -> ResponseBuilder {
        self.builder
    }
}

impl Deref for ControllerResponse {
    type Target = ResponseBuilder;

    fn deref(&self) -> &ResponseBuilder {
        &self.builder
    }
}

impl DerefMut for ControllerResponse {
    fn deref_mut(&mut self) -> &mut ResponseBuilder {
        &mut self.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_builder_yields_success_block() {
        let output = ResponseBuilder::new().finish();
        assert_eq!(output.content, vec![ContentBlock::text("Success")]);
        assert!(output.structured_content.is_none());
        assert!(!output.is_error);
    }

    #[test]
    fn lines_blocks_then_images() {
        let mut builder = ResponseBuilder::new();
        builder.line("Clicked").line("Page 1");
        builder.image(&[1, 2, 3], "image/png");
        builder.block("## Snapshot");
        builder.set("pageId", 1);
        let output = builder.finish();

        assert_eq!(output.content.len(), 3);
        assert_eq!(output.content[0].as_text(), Some("Clicked\nPage 1"));
        assert_eq!(output.content[1].as_text(), Some("## Snapshot"));
        assert_eq!(
            output.content[2],
            ContentBlock::Image {
                data: "AQID".into(),
                mime_type: "image/png".into()
            }
        );
        assert_eq!(output.field("pageId"), Some(&json!(1)));
    }

    #[test]
    fn error_output_carries_code() {
        let output = ToolOutput::error(&ToolError::StaleHandle(2));
        assert!(output.is_error);
        assert_eq!(output.field("error"), Some(&json!("stale_handle")));
        assert!(output.text().contains("Page 2 no longer exists"));
    }

    #[test]
    fn wire_shape() {
        let mut builder = ResponseBuilder::new();
        builder.line("ok");
        let wire = serde_json::to_value(builder.finish()).unwrap();
        assert_eq!(wire, json!({"content": [{"type": "text", "text": "ok"}]}));

        let wire = serde_json::to_value(ToolOutput::error(&ToolError::NoPages)).unwrap();
        assert_eq!(wire["isError"], json!(true));
    }

    #[test]
    fn intents_collapse() {
        let mut response = CdpResponse::new();
        assert!(response.intents().is_empty());
        response.include_snapshot(None, false).include_snapshot(Some(2), true);
        response.include_pages().include_pages();
        let (_, intents) = response.into_parts();
        assert_eq!(intents.snapshot, Some(SnapshotIntent { page: Some(2), verbose: true }));
        assert!(intents.pages);
    }

    #[test]
    fn image_format_parsing() {
        assert_eq!(ImageFormat::parse(None).unwrap(), ImageFormat::Png);
        assert_eq!(ImageFormat::parse(Some("JPG")).unwrap(), ImageFormat::Jpeg);
        assert!(matches!(ImageFormat::parse(Some("gif")), Err(ToolError::Validation(_))));
    }
}
