//! Getting a CDP connection to a browser: launch one or attach to a running one.

mod launch;

pub use launch::{LaunchedBrowser, download_managed_browser, find_browser_executable, launch_browser};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::BrowserConfig;
use crate::cdp::{CdpTransport, TransportError, WsTransport};

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to find browser executable: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Invalid browser endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("Failed to connect to browser: {0}")]
    Connect(#[from] TransportError),

    #[error("Browser rejected {method}: {message}")]
    Protocol { method: String, message: String },
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// A live CDP connection, plus the process behind it when we started it
pub struct Connected {
    pub transport: Arc<dyn CdpTransport>,
    pub process: Option<LaunchedBrowser>,
}

/// Produces browser connections for the manager
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> BrowserResult<Connected>;
}

/// Connects to `browser.endpoint` when configured, otherwise launches Chrome
pub struct ChromeConnector {
    config: BrowserConfig,
}

impl ChromeConnector {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ChromeConnector {
    async fn connect(&self) -> BrowserResult<Connected> {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        if let Some(endpoint) = &self.config.endpoint {
            let ws_url = resolve_endpoint(endpoint).await?;
            info!("Connecting to existing browser at {}", ws_url);
            let transport = WsTransport::connect(&ws_url, timeout).await?;
            return Ok(Connected {
                transport: Arc::new(transport),
                process: None,
            });
        }

        let process = launch_browser(&self.config).await?;
        let transport = WsTransport::connect(process.websocket_url(), timeout).await?;
        Ok(Connected {
            transport: Arc::new(transport),
            process: Some(process),
        })
    }
}

/// Turn a configured endpoint into a browser websocket URL.
///
/// `ws://`/`wss://` URLs are used as-is; `http(s)://host:port` is resolved
/// through the DevTools `/json/version` endpoint.
pub async fn resolve_endpoint(endpoint: &str) -> BrowserResult<String> {
    let invalid = |reason: String| BrowserError::Endpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = url::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(endpoint.to_string()),
        "http" | "https" => {
            let version_url = url.join("/json/version").map_err(|e| invalid(e.to_string()))?;
            let body: Value = reqwest::get(version_url)
                .await
                .map_err(|e| invalid(e.to_string()))?
                .error_for_status()
                .map_err(|e| invalid(e.to_string()))?
                .json()
                .await
                .map_err(|e| invalid(e.to_string()))?;
            debugger_url(&body).ok_or_else(|| invalid("no webSocketDebuggerUrl in /json/version".into()))
        }
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn debugger_url(version: &Value) -> Option<String> {
    version
        .get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn websocket_endpoints_pass_through() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(resolve_endpoint(url).await.unwrap(), url);
    }

    #[tokio::test]
    async fn rejects_unknown_schemes() {
        assert!(matches!(
            resolve_endpoint("ftp://localhost:9222").await,
            Err(BrowserError::Endpoint { .. })
        ));
        assert!(matches!(
            resolve_endpoint("not a url").await,
            Err(BrowserError::Endpoint { .. })
        ));
    }

    #[test]
    fn reads_debugger_url_from_version_payload() {
        let payload = json!({
            "Browser": "Chrome/132.0.0.0",
            "webSocketDebuggerUrl": "ws://localhost:9222/devtools/browser/xyz"
        });
        assert_eq!(
            debugger_url(&payload).as_deref(),
            Some("ws://localhost:9222/devtools/browser/xyz")
        );
        assert_eq!(debugger_url(&json!({})), None);
    }
}
