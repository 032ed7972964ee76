//! Caller scopes and their lifecycle.
//!
//! A scope id groups tool calls that share browser state (selected page,
//! emulation, open dialog). Scopes are created on first sight, refreshed on
//! every resolution and evicted silently once idle past the TTL.

mod state;

pub use state::{
    ActiveTrace, ColorScheme, DialogInfo, EmulationSettings, ExtensionInfo, NetworkConditions,
    SessionState, TraceRecord, Viewport,
};

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::utils::constants::{DEFAULT_SCOPE_TTL, DEFAULT_SWEEP_INTERVAL};

/// Shared handle to one scope's state
pub struct ScopeHandle {
    id: Option<String>,
    state: Mutex<SessionState>,
    gate: Mutex<()>,
}

impl ScopeHandle {
    fn new(id: Option<String>) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::default()),
            gate: Mutex::new(()),
        }
    }

    /// A state no other call will ever see
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self::new(None))
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.id.is_none()
    }

    /// Lock the state. Keep the guard short-lived; don't hold it across backend calls.
    pub async fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Serialize calls within this scope for as long as the guard lives
    pub async fn enter(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScopeConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SCOPE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

struct ScopeEntry {
    handle: Arc<ScopeHandle>,
    last_access: Instant,
}

/// Owner of all tracked scopes
pub struct ScopeManager {
    entries: DashMap<String, ScopeEntry>,
    config: ScopeConfig,
    cancel: CancellationToken,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ScopeManager {
    pub fn new(config: ScopeConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            config,
            cancel: CancellationToken::new(),
            sweeper: parking_lot::Mutex::new(None),
        })
    }

    /// Resolve a scope id to its state, creating it if unseen.
    ///
    /// `None` (or a blank id) yields a fresh unshared state.
    pub fn resolve(&self, scope_id: Option<&str>) -> Arc<ScopeHandle> {
        let Some(scope_id) = scope_id.filter(|id| !id.trim().is_empty()) else {
            return ScopeHandle::ephemeral();
        };

        let now = Instant::now();
        let entry = self
            .entries
            .entry(scope_id.to_string())
            .and_modify(|entry| entry.last_access = now)
            .or_insert_with(|| {
                debug!("Creating scope {}", scope_id);
                ScopeEntry {
                    handle: Arc::new(ScopeHandle::new(Some(scope_id.to_string()))),
                    last_access: now,
                }
            });
        entry.handle.clone()
    }

    pub fn contains(&self, scope_id: &str) -> bool {
        self.entries.contains_key(scope_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop scopes idle for longer than the TTL. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries.retain(|scope_id, entry| {
            let keep = entry.last_access.elapsed() <= ttl;
            if !keep {
                debug!("Evicting idle scope {}", scope_id);
            }
            keep
        });
        before.saturating_sub(self.entries.len())
    }

    /// Start the background sweep. Calling it again is a no-op.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let manager: Weak<Self> = Arc::downgrade(self);
        let token = self.cancel.clone();
        let period = self.config.sweep_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        let evicted = manager.sweep();
                        if evicted > 0 {
                            info!("Scope sweep evicted {} idle scope(s)", evicted);
                        }
                    }
                    _ = token.cancelled() => {
                        log::info!("Scope sweeper cancelled");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the sweeper and wait briefly for it to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => log::info!("Scope sweeper stopped"),
                Ok(Err(e)) => log::warn!("Scope sweeper panicked: {:?}", e),
                Err(_) => log::warn!("Scope sweeper didn't stop within timeout"),
            }
        }
    }
}

impl Drop for ScopeManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
