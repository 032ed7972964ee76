//! Stable page handles.
//!
//! The browser renumbers and reuses its own target ids; tools and agents get a
//! small integer that stays put for the life of the page and is never reused
//! within the process.

use chromiumoxide_cdp::cdp::browser_protocol::target::TargetId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::utils::ToolError;

pub type StableId = u32;

#[derive(Debug, Clone, Serialize)]
pub struct PageEntry {
    #[serde(rename = "id")]
    pub stable_id: StableId,
    #[serde(skip)]
    pub target_id: TargetId,
    pub url: String,
    pub title: String,
    #[serde(skip)]
    pub session_id: Option<String>,
    pub closed: bool,
}

#[derive(Default)]
struct RegistryInner {
    last_id: StableId,
    by_stable: HashMap<StableId, PageEntry>,
    by_native: HashMap<TargetId, StableId>,
}

/// Bidirectional map between stable ids and browser target ids
#[derive(Default)]
pub struct PageRegistry {
    inner: RwLock<RegistryInner>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page, returning its stable id.
    ///
    /// Registering a target that is already live returns the id it already has,
    /// so discovery and explicit creation can race without minting duplicates.
    pub fn register(&self, target_id: TargetId) -> StableId {
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_native.get(&target_id) {
            return *id;
        }
        inner.last_id += 1;
        let id = inner.last_id;
        inner.by_native.insert(target_id.clone(), id);
        inner.by_stable.insert(
            id,
            PageEntry {
                stable_id: id,
                target_id: target_id.clone(),
                url: String::new(),
                title: String::new(),
                session_id: None,
                closed: false,
            },
        );
        debug!("Registered page {} for target {}", id, target_id.inner());
        id
    }

    /// Native handle for a live page
    pub fn resolve(&self, id: StableId) -> Result<TargetId, ToolError> {
        self.entry(id).map(|entry| entry.target_id)
    }

    pub fn entry(&self, id: StableId) -> Result<PageEntry, ToolError> {
        match self.inner.read().by_stable.get(&id) {
            Some(entry) if !entry.closed => Ok(entry.clone()),
            _ => Err(ToolError::StaleHandle(id)),
        }
    }

    pub fn resolve_reverse(&self, target_id: &TargetId) -> Option<StableId> {
        self.inner.read().by_native.get(target_id).copied()
    }

    pub fn is_live(&self, id: StableId) -> bool {
        self.entry(id).is_ok()
    }

    /// Mark a page closed. Returns false if it was unknown or already closed.
    pub fn mark_closed(&self, id: StableId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.by_stable.get_mut(&id) else {
            return false;
        };
        if entry.closed {
            return false;
        }
        entry.closed = true;
        entry.session_id = None;
        let target_id = entry.target_id.clone();
        inner.by_native.remove(&target_id);
        debug!("Page {} closed", id);
        true
    }

    pub fn mark_closed_native(&self, target_id: &TargetId) -> Option<StableId> {
        let id = self.resolve_reverse(target_id)?;
        self.mark_closed(id).then_some(id)
    }

    pub fn set_session(&self, id: StableId, session_id: Option<String>) {
        if let Some(entry) = self.inner.write().by_stable.get_mut(&id) {
            entry.session_id = session_id;
        }
    }

    pub fn update_info(&self, id: StableId, url: Option<&str>, title: Option<&str>) {
        if let Some(entry) = self.inner.write().by_stable.get_mut(&id) {
            if let Some(url) = url {
                entry.url = url.to_string();
            }
            if let Some(title) = title {
                entry.title = title.to_string();
            }
        }
    }

    /// All open pages in stable id order
    pub fn live_pages(&self) -> Vec<PageEntry> {
        let inner = self.inner.read();
        let mut pages: Vec<PageEntry> = inner
            .by_stable
            .values()
            .filter(|p| !p.closed)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.stable_id);
        pages
    }

    pub fn first_live(&self) -> Option<PageEntry> {
        self.live_pages().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(s: &str) -> TargetId {
        TargetId::new(s)
    }

    #[test]
    fn ids_are_strictly_increasing_regardless_of_handles() {
        let registry = PageRegistry::new();
        let ids: Vec<StableId> = ["ZZZ", "AAA", "MMM", "000"]
            .iter()
            .map(|t| registry.register(target(t)))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn register_is_idempotent_for_live_targets() {
        let registry = PageRegistry::new();
        let a = registry.register(target("A"));
        assert_eq!(registry.register(target("A")), a);
        assert_eq!(registry.live_pages().len(), 1);
    }

    #[test]
    fn closed_ids_are_stale_and_never_reused() {
        let registry = PageRegistry::new();
        let p1 = registry.register(target("P1"));
        let p2 = registry.register(target("P2"));
        let p3 = registry.register(target("P3"));

        assert!(registry.mark_closed(p2));
        assert!(matches!(registry.resolve(p2), Err(ToolError::StaleHandle(2))));
        assert_eq!(registry.resolve(p1).unwrap(), target("P1"));
        assert_eq!(registry.resolve(p3).unwrap(), target("P3"));
        assert_eq!(registry.resolve_reverse(&target("P2")), None);

        // The browser reusing a target id gets a brand-new stable id
        let reopened = registry.register(target("P2"));
        assert_eq!(reopened, 4);
        assert!(!registry.mark_closed(p2));
    }

    #[test]
    fn unknown_ids_are_stale() {
        let registry = PageRegistry::new();
        assert!(matches!(registry.resolve(42), Err(ToolError::StaleHandle(42))));
        assert!(registry.first_live().is_none());
    }

    #[test]
    fn info_and_session_updates() {
        let registry = PageRegistry::new();
        let id = registry.register(target("T"));
        registry.update_info(id, Some("https://example.com/"), Some("Example"));
        registry.set_session(id, Some("S1".into()));
        let entry = registry.entry(id).unwrap();
        assert_eq!(entry.url, "https://example.com/");
        assert_eq!(entry.title, "Example");
        assert_eq!(entry.session_id.as_deref(), Some("S1"));
        assert_eq!(registry.mark_closed_native(&target("T")), Some(id));
        assert!(registry.live_pages().is_empty());
    }
}
