//! Controller backend: named actions executed by code running inside the browser.
//!
//! The core never interprets an action; it only forwards `(action, payload)`
//! bound to the caller's window and waits for the reply.

mod channel;

pub use channel::ExtensionChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("Browser extension is not connected")]
    NotConnected,

    #[error("Browser extension disconnected before replying")]
    Closed,

    #[error("Extension action failed: {0}")]
    Action(String),

    #[error("Extension action timed out after {0}ms")]
    Timeout(u64),
}

/// Executes one named action and returns its result payload
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    async fn execute(&self, action: &str, payload: Value) -> Result<Value, ControllerError>;

    fn is_connected(&self) -> bool {
        true
    }
}

/// Stand-in used when no extension listener is configured
pub struct Disconnected;

#[async_trait]
impl ActionExecutor for Disconnected {
    async fn execute(&self, _action: &str, _payload: Value) -> Result<Value, ControllerError> {
        Err(ControllerError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address the extension connects to, e.g. `127.0.0.1:9225`
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
}

fn default_action_timeout_ms() -> u64 {
    15_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

/// An executor bound to one scope's window with a deadline per action
#[derive(Clone)]
pub struct BoundExecutor {
    executor: Arc<dyn ActionExecutor>,
    window_id: Option<i64>,
    timeout: Duration,
}

impl BoundExecutor {
    pub fn new(executor: Arc<dyn ActionExecutor>, window_id: Option<i64>, timeout: Duration) -> Self {
        Self {
            executor,
            window_id,
            timeout,
        }
    }

    pub fn window_id(&self) -> Option<i64> {
        self.window_id
    }

    /// Run an action; the bound window is added to object payloads that don't name one
    pub async fn execute(&self, action: &str, payload: Value) -> Result<Value, ControllerError> {
        let payload = match (payload, self.window_id) {
            (Value::Object(mut map), Some(window)) => {
                map.entry("windowId").or_insert(json!(window));
                Value::Object(map)
            }
            (Value::Null, Some(window)) => json!({ "windowId": window }),
            (other, _) => other,
        };

        tokio::time::timeout(self.timeout, self.executor.execute(action, payload))
            .await
            .map_err(|_| ControllerError::Timeout(self.timeout.as_millis() as u64))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ActionExecutor for Recorder {
        async fn execute(&self, action: &str, payload: Value) -> Result<Value, ControllerError> {
            self.seen.lock().push((action.to_string(), payload));
            if action == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn injects_window_id() {
        let recorder = Arc::new(Recorder::default());
        let bound = BoundExecutor::new(recorder.clone(), Some(42), Duration::from_secs(1));

        bound.execute("getTabs", Value::Null).await.unwrap();
        bound.execute("switchTab", json!({"tabId": 3})).await.unwrap();
        bound.execute("switchTab", json!({"tabId": 3, "windowId": 7})).await.unwrap();

        let seen = recorder.seen.lock();
        assert_eq!(seen[0].1, json!({"windowId": 42}));
        assert_eq!(seen[1].1, json!({"tabId": 3, "windowId": 42}));
        assert_eq!(seen[2].1, json!({"tabId": 3, "windowId": 7}));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let bound = BoundExecutor::new(Arc::new(Recorder::default()), None, Duration::from_millis(250));
        assert_eq!(
            bound.execute("hang", json!({})).await,
            Err(ControllerError::Timeout(250))
        );
    }

    #[tokio::test]
    async fn disconnected_executor() {
        let bound = BoundExecutor::new(Arc::new(Disconnected), None, Duration::from_secs(1));
        assert_eq!(
            bound.execute("getBookmarks", json!({})).await,
            Err(ControllerError::NotConnected)
        );
    }
}
