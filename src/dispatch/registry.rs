//! Tool definitions and the static name -> definition registry.
//!
//! Handlers come in two shapes, one per backend. Each shape has its own typed
//! trait; registration erases the argument type behind a `bind` step that
//! validates raw arguments before anything touches a backend.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::context::{CdpContext, ControllerContext};
use crate::response::{CdpResponse, ControllerResponse};
use crate::utils::constants::TAB_ID_ARG;
use crate::utils::{ToolError, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    RemoteDebug,
    Controller,
}

/// A tool that acts on a page through the remote-debugging connection
pub trait CdpTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    fn name() -> &'static str;

    fn description() -> &'static str;

    fn read_only() -> bool {
        false
    }

    fn execute(
        &self,
        args: Self::Args,
        response: &mut CdpResponse,
        ctx: &CdpContext,
    ) -> impl Future<Output = ToolResult<()>> + Send;
}

/// A tool that sends named actions to the browser extension
pub trait ControllerTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    fn name() -> &'static str;

    fn description() -> &'static str;

    fn read_only() -> bool {
        false
    }

    fn execute(
        &self,
        args: Self::Args,
        response: &mut ControllerResponse,
        ctx: &ControllerContext,
    ) -> impl Future<Output = ToolResult<()>> + Send;
}

/// A remote-debug call whose arguments already passed validation
#[async_trait]
pub trait BoundCdpCall: Send {
    async fn run(self: Box<Self>, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()>;
}

#[async_trait]
pub trait BoundControllerCall: Send {
    async fn run(
        self: Box<Self>,
        response: &mut ControllerResponse,
        ctx: &ControllerContext,
    ) -> ToolResult<()>;
}

pub trait ErasedCdpTool: Send + Sync {
    fn bind(self: Arc<Self>, raw: Value) -> ToolResult<Box<dyn BoundCdpCall>>;
}

pub trait ErasedControllerTool: Send + Sync {
    fn bind(self: Arc<Self>, raw: Value) -> ToolResult<Box<dyn BoundControllerCall>>;
}

struct Adapter<T>(T);

struct Binding<T, A> {
    tool: Arc<Adapter<T>>,
    args: A,
}

impl<T: CdpTool> ErasedCdpTool for Adapter<T> {
    fn bind(self: Arc<Self>, raw: Value) -> ToolResult<Box<dyn BoundCdpCall>> {
        let args = parse_args::<T::Args>(raw)?;
        Ok(Box::new(Binding { tool: self, args }))
    }
}

#[async_trait]
impl<T: CdpTool> BoundCdpCall for Binding<T, T::Args> {
    async fn run(self: Box<Self>, response: &mut CdpResponse, ctx: &CdpContext) -> ToolResult<()> {
        let Binding { tool, args } = *self;
        tool.0.execute(args, response, ctx).await
    }
}

impl<T: ControllerTool> ErasedControllerTool for Adapter<T> {
    fn bind(self: Arc<Self>, raw: Value) -> ToolResult<Box<dyn BoundControllerCall>> {
        let args = parse_args::<T::Args>(raw)?;
        Ok(Box::new(Binding { tool: self, args }))
    }
}

#[async_trait]
impl<T: ControllerTool> BoundControllerCall for Binding<T, T::Args> {
    async fn run(
        self: Box<Self>,
        response: &mut ControllerResponse,
        ctx: &ControllerContext,
    ) -> ToolResult<()> {
        let Binding { tool, args } = *self;
        tool.0.execute(args, response, ctx).await
    }
}

/// Deserialize raw arguments; a missing argument object counts as `{}`
pub fn parse_args<A: DeserializeOwned>(raw: Value) -> ToolResult<A> {
    let raw = match raw {
        Value::Null => Value::Object(Map::new()),
        obj @ Value::Object(_) => obj,
        other => {
            return Err(ToolError::validation(format!(
                "arguments must be an object, got {}",
                other
            )));
        }
    };
    serde_json::from_value(raw).map_err(|e| ToolError::validation(e.to_string()))
}

pub enum ToolHandler {
    RemoteDebug(Arc<dyn ErasedCdpTool>),
    Controller(Arc<dyn ErasedControllerTool>),
}

pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Arc<Map<String, Value>>,
    pub read_only: bool,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn remote_debug<T: CdpTool>(tool: T) -> Self {
        let mut schema = schema_for::<T::Args>();
        // Every remote-debug tool can be routed to a specific page
        let properties = schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(properties) = properties {
            properties.entry(TAB_ID_ARG).or_insert_with(|| {
                json!({
                    "type": "integer",
                    "minimum": 1,
                    "description": "Page id from list_pages. Defaults to the selected page."
                })
            });
        }
        Self {
            name: T::name(),
            description: T::description(),
            input_schema: Arc::new(schema),
            read_only: T::read_only(),
            handler: ToolHandler::RemoteDebug(Arc::new(Adapter(tool))),
        }
    }

    pub fn controller<T: ControllerTool>(tool: T) -> Self {
        Self {
            name: T::name(),
            description: T::description(),
            input_schema: Arc::new(schema_for::<T::Args>()),
            read_only: T::read_only(),
            handler: ToolHandler::Controller(Arc::new(Adapter(tool))),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self.handler {
            ToolHandler::RemoteDebug(_) => ToolKind::RemoteDebug,
            ToolHandler::Controller(_) => ToolKind::Controller,
        }
    }
}

fn schema_for<A: JsonSchema>() -> Map<String, Value> {
    let schema = schemars::schema_for!(A);
    let mut map = match serde_json::to_value(schema) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    map.remove("$schema");
    map.entry("type").or_insert_with(|| json!("object"));
    map
}

/// Immutable name -> definition map built once at startup
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<&'static str>,
    tools: HashMap<&'static str, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new(definitions: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut registry = Self::default();
        for definition in definitions {
            if registry.tools.contains_key(definition.name) {
                warn!("Duplicate tool '{}' ignored", definition.name);
                continue;
            }
            registry.order.push(definition.name);
            registry.tools.insert(definition.name, definition);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Definitions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        times: Option<u32>,
    }

    struct Echo;

    impl CdpTool for Echo {
        type Args = EchoArgs;

        fn name() -> &'static str {
            "echo"
        }

        fn description() -> &'static str {
            "Echo text"
        }

        fn read_only() -> bool {
            true
        }

        async fn execute(&self, args: EchoArgs, response: &mut CdpResponse, _ctx: &CdpContext) -> ToolResult<()> {
            for _ in 0..args.times.unwrap_or(1) {
                response.line(args.text.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn parse_args_validates() {
        let args: EchoArgs = parse_args(json!({"text": "hi", "times": 2})).unwrap();
        assert_eq!(args.times, Some(2));
        assert!(matches!(parse_args::<EchoArgs>(json!({"times": 2})), Err(ToolError::Validation(_))));
        assert!(matches!(parse_args::<EchoArgs>(json!([1])), Err(ToolError::Validation(_))));
        assert!(matches!(
            parse_args::<EchoArgs>(json!({"text": "x", "times": -1})),
            Err(ToolError::Validation(_))
        ));
    }

    #[test]
    fn remote_debug_schema_gains_tab_id() {
        let definition = ToolDefinition::remote_debug(Echo);
        assert_eq!(definition.kind(), ToolKind::RemoteDebug);
        assert!(definition.read_only);
        let properties = definition.input_schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("text"));
        assert!(properties.contains_key("tabId"));
        assert_eq!(definition.input_schema["type"], json!("object"));
    }

    #[test]
    fn bind_rejects_bad_arguments_up_front() {
        let definition = ToolDefinition::remote_debug(Echo);
        let ToolHandler::RemoteDebug(tool) = &definition.handler else {
            panic!("wrong kind");
        };
        assert!(tool.clone().bind(json!({"text": "ok"})).is_ok());
        assert!(matches!(tool.clone().bind(json!({})), Err(ToolError::Validation(_))));
    }

    #[test]
    fn registry_keeps_first_definition_and_order() {
        let registry = ToolRegistry::new([
            ToolDefinition::remote_debug(Echo),
            ToolDefinition::remote_debug(Echo),
        ]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.iter().map(|d| d.name).collect::<Vec<_>>(), vec!["echo"]);
    }
}
