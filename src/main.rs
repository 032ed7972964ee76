// Browser bridge MCP server over stdio.
//
// stdout carries the MCP protocol; all logging goes to stderr.

use anyhow::{Context, Result};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kodegen_browser_bridge::controller::ActionExecutor;
use kodegen_browser_bridge::tools::default_registry;
use kodegen_browser_bridge::{
    BridgeServer, BrowserManager, ChromeConnector, Disconnected, Dispatcher, ExtensionChannel,
    ScopeManager, load_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().context("Failed to load configuration")?;

    let scopes = ScopeManager::new(config.scopes.scope_config());
    scopes.start_sweeper();

    let manager = Arc::new(BrowserManager::new(
        Arc::new(ChromeConnector::new(config.browser.clone())),
        Duration::from_millis(config.browser.request_timeout_ms),
        config.collector,
    ));

    let channel = match config.controller.listen {
        Some(addr) => Some(Arc::new(
            ExtensionChannel::bind(addr)
                .await
                .with_context(|| format!("Failed to bind extension channel on {}", addr))?,
        )),
        None => None,
    };
    let executor: Arc<dyn ActionExecutor> = match &channel {
        Some(channel) => channel.clone(),
        None => {
            info!("No controller.listen configured; extension tools will report not connected");
            Arc::new(Disconnected)
        }
    };

    let dispatcher = Dispatcher::new(Arc::new(default_registry()), manager.clone(), executor)
        .with_action_timeout(Duration::from_millis(config.controller.action_timeout_ms))
        .with_serialized_scopes(config.scopes.serialize_calls);

    let server = BridgeServer::new(Arc::new(dispatcher), scopes.clone());
    info!(
        "Starting browser bridge with {} tools",
        server.dispatcher().registry().len()
    );

    let service = server
        .serve(stdio())
        .await
        .context("Failed to start MCP stdio service")?;

    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            cancel.cancel();
        }
    });

    if let Err(e) = service.waiting().await {
        warn!("MCP service stopped with error: {}", e);
    }

    scopes.shutdown().await;
    if let Some(channel) = &channel {
        channel.shutdown();
    }
    manager.shutdown().await;
    info!("Browser bridge stopped");
    Ok(())
}
