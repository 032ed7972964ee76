//! Scoped browser tool dispatch for AI agents
//!
//! Routes named tool calls either to a page over the Chrome DevTools Protocol or
//! to a browser extension over a websocket channel, keeping per-caller state
//! (selected page, emulation, dialogs, traces) isolated between scopes.

pub mod browser;
pub mod cdp;
pub mod collector;
pub mod controller;
pub mod dispatch;
pub mod enrichment;
pub mod manager;
pub mod pages;
pub mod response;
pub mod scope;
pub mod server;
pub mod snapshot;
pub mod tools;
pub mod utils;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::CollectorConfig;
use crate::controller::ControllerConfig;
use crate::scope::ScopeConfig;
use crate::utils::constants::DEFAULT_CDP_TIMEOUT_MS;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "KODEGEN_BROWSER_BRIDGE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub scopes: ScopesConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub collector: CollectorConfig,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,

    /// Browser binary to launch instead of the discovered one
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Attach to a running browser (`ws://…` or `http://host:port`) instead of launching
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// One call at a time per scope
    #[serde(default = "default_serialize_calls")]
    pub serialize_calls: bool,
}

impl ScopesConfig {
    pub fn scope_config(&self) -> ScopeConfig {
        ScopeConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false // SECURE BY DEFAULT
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_CDP_TIMEOUT_MS
}

fn default_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_serialize_calls() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
            executable: None,
            endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for ScopesConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            serialize_calls: default_serialize_calls(),
        }
    }
}

/// Where the config file is looked for, in order
pub fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV)
        && !explicit.trim().is_empty()
    {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir()
        .map(|dir| dir.join("kodegen").join("browser-bridge.yaml"))
        .filter(|path| path.exists())
}

/// Load YAML config, falling back to defaults when no file is present
pub fn load_config() -> anyhow::Result<Config> {
    match config_path() {
        Some(path) => {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            parse_config(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

pub fn parse_config(yaml: &str) -> anyhow::Result<Config> {
    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

pub use browser::{BrowserError, BrowserResult, ChromeConnector, Connector};
pub use controller::{ActionExecutor, ControllerError, Disconnected, ExtensionChannel};
pub use dispatch::{Dispatcher, ToolDefinition, ToolKind, ToolRegistry};
pub use manager::BrowserManager;
pub use pages::{PageRegistry, StableId};
pub use response::{ContentBlock, ToolOutput};
pub use scope::{ScopeHandle, ScopeManager, SessionState};
pub use server::BridgeServer;
pub use utils::{ToolError, ToolResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.window.width, 1280);
        assert_eq!(config.scopes.ttl_secs, 1800);
        assert!(config.scopes.serialize_calls);
        assert_eq!(config.controller.action_timeout_ms, 15_000);
        assert_eq!(config.collector.max_console_messages, 500);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            "browser:\n  endpoint: http://127.0.0.1:9222\n  window:\n    width: 800\n\
             scopes:\n  serialize_calls: false\n\
             controller:\n  listen: 127.0.0.1:9225\n",
        )
        .unwrap();
        assert_eq!(config.browser.endpoint.as_deref(), Some("http://127.0.0.1:9222"));
        assert_eq!(config.browser.window.width, 800);
        assert_eq!(config.browser.window.height, 720);
        assert!(!config.scopes.serialize_calls);
        assert_eq!(config.scopes.sweep_interval_secs, 300);
        assert_eq!(
            config.controller.listen.map(|a| a.port()),
            Some(9225)
        );
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(parse_config("browser: [1, 2").is_err());
    }
}
