//! Accessibility snapshots and element resolution.
//!
//! Each capture is a new generation for its page and atomically replaces the
//! previous one. A uid names its page and generation, so a uid from an older
//! capture fails with a stale-reference error instead of landing on whatever
//! element now sits at the same position.

mod element;
mod render;
pub(crate) mod tree;

pub use element::{ElementHandle, Point};
pub use render::{render, render_simplified, render_verbose};
pub use tree::{NodeRef, PageSnapshot, Rect, SnapshotNode, build_snapshot, layout_rects, parse_uid};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::cdp::PageSession;
use crate::pages::{PageRegistry, StableId};
use crate::utils::{ToolError, ToolResult};

/// A uid resolved against the current generation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub page_id: StableId,
    pub uid: String,
    pub node: NodeRef,
}

/// Latest snapshot per page
pub struct SnapshotStore {
    current: DashMap<StableId, Arc<PageSnapshot>>,
    next_generation: AtomicU64,
    pages: Arc<PageRegistry>,
}

impl SnapshotStore {
    pub fn new(pages: Arc<PageRegistry>) -> Self {
        Self {
            current: DashMap::new(),
            next_generation: AtomicU64::new(1),
            pages,
        }
    }

    /// Capture a new generation for a page over its CDP session
    pub async fn capture(
        &self,
        page_id: StableId,
        session: &PageSession,
        verbose: bool,
    ) -> ToolResult<Arc<PageSnapshot>> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let ax_tree = session
            .send("Accessibility.getFullAXTree", json!({}))
            .await?;

        // Geometry is nice to have; a page that refuses the layout capture still snapshots.
        let rects = match session
            .send(
                "DOMSnapshot.captureSnapshot",
                json!({ "computedStyles": [] }),
            )
            .await
        {
            Ok(capture) => layout_rects(&capture),
            Err(e) => {
                warn!("Layout capture failed for page {}: {}", page_id, e);
                HashMap::new()
            }
        };

        Ok(self.install(build_snapshot(page_id, generation, &ax_tree, &rects, verbose)))
    }

    /// Build and install a snapshot from an already fetched accessibility tree
    pub fn ingest(&self, page_id: StableId, ax_tree: &Value, verbose: bool) -> Arc<PageSnapshot> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.install(build_snapshot(page_id, generation, ax_tree, &HashMap::new(), verbose))
    }

    /// Replace the page's snapshot unless a newer generation already landed.
    /// Returns the snapshot that is current afterwards, so callers never hand
    /// out uids from a discarded capture.
    fn install(&self, snapshot: PageSnapshot) -> Arc<PageSnapshot> {
        let snapshot = Arc::new(snapshot);
        let current = match self.current.entry(snapshot.page_id) {
            Entry::Occupied(mut existing) => {
                if existing.get().generation < snapshot.generation {
                    existing.insert(snapshot.clone());
                    snapshot
                } else {
                    debug!(
                        "Discarding snapshot generation {} for page {}: {} is newer",
                        snapshot.generation,
                        snapshot.page_id,
                        existing.get().generation
                    );
                    existing.get().clone()
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot.clone());
                snapshot
            }
        };
        debug!(
            "Snapshot generation {} for page {} ({} nodes)",
            current.generation,
            current.page_id,
            current.node_count()
        );
        current
    }

    pub fn latest(&self, page_id: StableId) -> Option<Arc<PageSnapshot>> {
        self.current.get(&page_id).map(|s| s.value().clone())
    }

    /// Forget the page's snapshot; every uid issued for it becomes stale
    pub fn invalidate(&self, page_id: StableId) {
        if self.current.remove(&page_id).is_some() {
            debug!("Invalidated snapshots for page {}", page_id);
        }
    }

    /// Look a uid up in the latest generation of the page that issued it
    pub fn resolve(&self, uid: &str) -> ToolResult<ResolvedNode> {
        let Some((page_id, generation)) = parse_uid(uid) else {
            return Err(ToolError::validation(format!(
                "'{}' is not a snapshot uid. Use a uid from take_snapshot output.",
                uid
            )));
        };

        if !self.pages.is_live(page_id) {
            return Err(ToolError::StaleElementReference(uid.to_string()));
        }

        let snapshot = self
            .latest(page_id)
            .ok_or_else(|| ToolError::StaleElementReference(uid.to_string()))?;
        if snapshot.generation != generation {
            return Err(ToolError::StaleElementReference(uid.to_string()));
        }

        let node = snapshot.lookup(uid).cloned().ok_or_else(|| {
            ToolError::validation(format!(
                "No element with uid '{}' in the latest snapshot of page {}",
                uid, page_id
            ))
        })?;

        Ok(ResolvedNode {
            page_id,
            uid: uid.trim().to_string(),
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::tree::fixtures::login_page;
    use super::*;
    use chromiumoxide_cdp::cdp::browser_protocol::target::TargetId;

    fn store_with_page() -> (SnapshotStore, StableId, Arc<PageRegistry>) {
        let pages = Arc::new(PageRegistry::new());
        let page = pages.register(TargetId::new("T1"));
        (SnapshotStore::new(pages.clone()), page, pages)
    }

    #[test]
    fn resolves_uid_in_current_generation() {
        let (store, page, _) = store_with_page();
        let snap = store.ingest(page, &login_page(), false);
        let uid = snap.find_uid("button", "Submit").unwrap();
        let resolved = store.resolve(&uid).unwrap();
        assert_eq!(resolved.page_id, page);
        assert_eq!(resolved.node.backend_node_id, Some(104));
    }

    #[test]
    fn uid_from_superseded_generation_is_stale() {
        let (store, page, _) = store_with_page();
        let g1 = store.ingest(page, &login_page(), false);
        let old_uid = g1.find_uid("button", "Submit").unwrap();

        let g2 = store.ingest(page, &login_page(), false);
        assert!(g2.generation > g1.generation);
        assert!(matches!(
            store.resolve(&old_uid),
            Err(ToolError::StaleElementReference(_))
        ));
        let new_uid = g2.find_uid("button", "Submit").unwrap();
        assert_ne!(new_uid, old_uid);
        assert!(store.resolve(&new_uid).is_ok());
    }

    #[test]
    fn closing_the_page_invalidates_its_uids() {
        let (store, page, pages) = store_with_page();
        let uid = store
            .ingest(page, &login_page(), false)
            .find_uid("link", "Forgot password?")
            .unwrap();
        pages.mark_closed(page);
        assert!(matches!(
            store.resolve(&uid),
            Err(ToolError::StaleElementReference(_))
        ));
    }

    #[test]
    fn older_generation_never_overwrites_newer() {
        let (store, page, _) = store_with_page();
        let newer = build_snapshot(page, 10, &login_page(), &HashMap::new(), false);
        let older = build_snapshot(page, 9, &login_page(), &HashMap::new(), false);
        store.install(newer);
        let returned = store.install(older);
        assert_eq!(store.latest(page).unwrap().generation, 10);
        // The late capture hands back the current generation, whose uids resolve
        assert_eq!(returned.generation, 10);
        let uid = returned.find_uid("button", "Submit").unwrap();
        assert!(store.resolve(&uid).is_ok());
    }

    #[test]
    fn malformed_and_unknown_uids() {
        let (store, page, _) = store_with_page();
        let snap = store.ingest(page, &login_page(), false);
        assert!(matches!(store.resolve("e1"), Err(ToolError::Validation(_))));
        let bogus = format!("{}_{}_999", page, snap.generation);
        assert!(matches!(store.resolve(&bogus), Err(ToolError::Validation(_))));
    }

    #[test]
    fn invalidate_drops_snapshot() {
        let (store, page, _) = store_with_page();
        let uid = store
            .ingest(page, &login_page(), true)
            .find_uid("heading", "Sign in")
            .unwrap();
        store.invalidate(page);
        assert!(store.latest(page).is_none());
        assert!(matches!(
            store.resolve(&uid),
            Err(ToolError::StaleElementReference(_))
        ));
    }
}
