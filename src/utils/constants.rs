//! Shared configuration constants
//!
//! Default values used across the scope manager, browser manager and tools.

use std::time::Duration;

/// Idle time after which a scope's state is discarded
pub const DEFAULT_SCOPE_TTL: Duration = Duration::from_secs(30 * 60);

/// How often idle scopes are swept
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Request metadata key carrying the caller's scope id
pub const SCOPE_META_KEY: &str = "scopeId";

/// Tool argument used to route a call to a specific page
pub const TAB_ID_ARG: &str = "tabId";

/// Default timeout for CDP commands sent through a page session
pub const DEFAULT_CDP_TIMEOUT_MS: u64 = 30_000;

/// Chrome user agent string used when launching a managed browser
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
