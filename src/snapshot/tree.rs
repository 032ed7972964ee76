//! Accessibility tree -> immutable snapshot tree with per-generation uids.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::pages::StableId;

/// Roles an agent can act on
pub(crate) const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "radio", "checkbox", "switch", "slider", "spinbutton",
    "tab", "treeitem", "gridcell", "columnheader", "rowheader",
    "textField", "select",
];

const TYPEABLE_ROLES: &[&str] = &["textbox", "searchbox", "combobox", "spinbutton", "textField"];

/// Containers that carry no information of their own
const STRUCTURAL_ROLES: &[&str] = &[
    "generic", "none", "presentation", "group", "region",
    "GenericContainer", "Section", "InlineTextBox", "LineBreak",
];

/// Properties copied verbatim into node attributes
const KEPT_PROPERTIES: &[&str] = &[
    "focused", "focusable", "checked", "disabled", "expanded", "selected",
    "pressed", "required", "readonly", "level", "url", "multiline", "haspopup",
    "valuemin", "valuemax", "invalid",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One kept node. Trees can be as deep as the page's DOM, so every
/// traversal in this module (drop included) uses an explicit stack.
#[derive(Debug)]
pub struct SnapshotNode {
    pub uid: String,
    pub role: String,
    pub name: String,
    pub value: Option<String>,
    pub description: Option<String>,
    pub backend_node_id: Option<i64>,
    pub rect: Option<Rect>,
    pub attributes: BTreeMap<String, Value>,
    pub depth: usize,
    pub children: Vec<SnapshotNode>,
}

impl Drop for SnapshotNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl SnapshotNode {
    pub fn is_interactive(&self) -> bool {
        role_in(&self.role, INTERACTIVE_ROLES)
    }

    pub fn is_typeable(&self) -> bool {
        role_in(&self.role, TYPEABLE_ROLES)
    }

    /// Interactive and not primarily a text entry
    pub fn is_clickable(&self) -> bool {
        self.is_interactive() && !self.is_typeable()
    }

    /// Pre-order walk
    pub fn walk(&self) -> Vec<&SnapshotNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Minimal facts needed to find a node's element again
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub backend_node_id: Option<i64>,
    pub role: String,
    pub name: String,
}

/// One immutable capture of a page
#[derive(Debug)]
pub struct PageSnapshot {
    pub page_id: StableId,
    pub generation: u64,
    pub verbose: bool,
    pub root: Option<SnapshotNode>,
    index: HashMap<String, NodeRef>,
}

impl PageSnapshot {
    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, uid: &str) -> Option<&NodeRef> {
        self.index.get(uid)
    }

    pub fn nodes(&self) -> Vec<&SnapshotNode> {
        self.root.as_ref().map(SnapshotNode::walk).unwrap_or_default()
    }

    /// Uid of the first node with this role and name, mostly useful in tests and logs
    pub fn find_uid(&self, role: &str, name: &str) -> Option<String> {
        self.nodes()
            .into_iter()
            .find(|n| n.role == role && n.name == name)
            .map(|n| n.uid.clone())
    }
}

pub fn format_uid(page_id: StableId, generation: u64, index: u32) -> String {
    format!("{}_{}_{}", page_id, generation, index)
}

/// Split a uid into (page, generation); `None` if it isn't one of ours
pub fn parse_uid(uid: &str) -> Option<(StableId, u64)> {
    let mut parts = uid.trim().splitn(3, '_');
    let page = parts.next()?.parse().ok()?;
    let generation = parts.next()?.parse().ok()?;
    parts.next()?.parse::<u32>().ok()?;
    Some((page, generation))
}

fn role_in(role: &str, roles: &[&str]) -> bool {
    roles.iter().any(|r| r.eq_ignore_ascii_case(role))
}

fn ax_string(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| v.get("value").and_then(Value::as_str).or_else(|| v.as_str()))
        .unwrap_or("")
        .to_string()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// `backendNodeId -> bounds` from a `DOMSnapshot.captureSnapshot` result
pub fn layout_rects(capture: &Value) -> HashMap<i64, Rect> {
    let mut rects = HashMap::new();
    let Some(documents) = capture.get("documents").and_then(Value::as_array) else {
        return rects;
    };
    for doc in documents {
        let backend_ids: Vec<i64> = doc
            .pointer("/nodes/backendNodeId")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        let node_index = doc.pointer("/layout/nodeIndex").and_then(Value::as_array);
        let bounds = doc.pointer("/layout/bounds").and_then(Value::as_array);
        let (Some(node_index), Some(bounds)) = (node_index, bounds) else {
            continue;
        };
        for (idx, bound) in node_index.iter().zip(bounds) {
            let Some(backend_id) = idx
                .as_u64()
                .and_then(|i| backend_ids.get(i as usize))
                .copied()
            else {
                continue;
            };
            let b: Vec<f64> = bound
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_f64).collect())
                .unwrap_or_default();
            if b.len() == 4 {
                rects.insert(
                    backend_id,
                    Rect {
                        x: b[0],
                        y: b[1],
                        width: b[2],
                        height: b[3],
                    },
                );
            }
        }
    }
    rects
}

struct Builder<'a> {
    nodes: HashMap<&'a str, &'a Value>,
    rects: &'a HashMap<i64, Rect>,
    verbose: bool,
    page_id: StableId,
    generation: u64,
    counter: u32,
    visited: HashSet<&'a str>,
    index: HashMap<String, NodeRef>,
}

/// A kept node waiting for its children, plus the arena slots of those children
struct Slot {
    node: Option<SnapshotNode>,
    children: Vec<usize>,
}

impl<'a> Builder<'a> {
    fn is_relevant(&self, node: &Value, role: &str, name: &str) -> bool {
        if node.get("ignored").and_then(Value::as_bool).unwrap_or(false) {
            return false;
        }
        if role_in(role, &["RootWebArea", "WebArea"]) || role_in(role, INTERACTIVE_ROLES) {
            return true;
        }
        if self.verbose {
            return !role_in(role, &["none", "presentation", "InlineTextBox"]);
        }
        !name.is_empty() && !role_in(role, STRUCTURAL_ROLES)
    }

    /// Kept nodes under `root_id`; irrelevant nodes are replaced by their kept
    /// descendants. Nodes are numbered in document (pre-)order.
    fn build(&mut self, root_id: &'a str) -> Vec<SnapshotNode> {
        let mut slots: Vec<Slot> = Vec::new();
        let mut top: Vec<usize> = Vec::new();
        // (ax node id, depth, arena slot of the nearest kept ancestor)
        let mut work: Vec<(&'a str, usize, Option<usize>)> = vec![(root_id, 0, None)];

        while let Some((id, depth, parent)) = work.pop() {
            if !self.visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(id).copied() else {
                continue;
            };

            let role = ax_string(node, "role");
            let name = ax_string(node, "name");
            let child_ids = node
                .get("childIds")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_str).collect::<Vec<_>>())
                .unwrap_or_default();

            if !self.is_relevant(node, &role, &name) {
                work.extend(child_ids.into_iter().rev().map(|child| (child, depth, parent)));
                continue;
            }

            let slot = slots.len();
            slots.push(Slot {
                node: Some(self.keep(node, role, name, depth)),
                children: Vec::new(),
            });
            match parent {
                Some(parent) => slots[parent].children.push(slot),
                None => top.push(slot),
            }
            work.extend(child_ids.into_iter().rev().map(|child| (child, depth + 1, Some(slot))));
        }

        // Children always sit in later slots than their parent
        for i in (0..slots.len()).rev() {
            let kids = std::mem::take(&mut slots[i].children);
            let children: Vec<SnapshotNode> = kids.into_iter().filter_map(|k| slots[k].node.take()).collect();
            if let Some(node) = slots[i].node.as_mut() {
                node.children = children;
            }
        }
        top.into_iter().filter_map(|i| slots[i].node.take()).collect()
    }

    /// Assign a uid to a relevant node and index it
    fn keep(&mut self, node: &Value, role: String, name: String, depth: usize) -> SnapshotNode {
        self.counter += 1;
        let uid = format_uid(self.page_id, self.generation, self.counter);
        let backend_node_id = node.get("backendDOMNodeId").and_then(Value::as_i64);

        let mut attributes = BTreeMap::new();
        if let Some(props) = node.get("properties").and_then(Value::as_array) {
            for prop in props {
                let Some(prop_name) = prop.get("name").and_then(Value::as_str) else {
                    continue;
                };
                if !KEPT_PROPERTIES.contains(&prop_name) {
                    continue;
                }
                let value = prop
                    .get("value")
                    .and_then(|v| v.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);
                // `false` flags are noise in rendered output
                if value == Value::Bool(false) || value.is_null() {
                    continue;
                }
                attributes.insert(prop_name.to_string(), value);
            }
        }

        self.index.insert(
            uid.clone(),
            NodeRef {
                backend_node_id,
                role: role.clone(),
                name: name.clone(),
            },
        );

        SnapshotNode {
            uid,
            role,
            name,
            value: non_empty(ax_string(node, "value")),
            description: non_empty(ax_string(node, "description")),
            backend_node_id,
            rect: backend_node_id.and_then(|id| self.rects.get(&id).copied()),
            attributes,
            depth,
            children: Vec::new(),
        }
    }
}

/// Build a snapshot from an `Accessibility.getFullAXTree` result.
///
/// Pages without any relevant nodes produce an empty snapshot, not an error.
pub fn build_snapshot(
    page_id: StableId,
    generation: u64,
    ax_tree: &Value,
    rects: &HashMap<i64, Rect>,
    verbose: bool,
) -> PageSnapshot {
    let raw_nodes: &[Value] = ax_tree
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut builder = Builder {
        nodes: raw_nodes
            .iter()
            .filter_map(|n| n.get("nodeId").and_then(Value::as_str).map(|id| (id, n)))
            .collect(),
        rects,
        verbose,
        page_id,
        generation,
        counter: 0,
        visited: HashSet::new(),
        index: HashMap::new(),
    };

    let root_id = raw_nodes
        .iter()
        .find(|n| n.get("parentId").is_none())
        .or_else(|| raw_nodes.first())
        .and_then(|n| n.get("nodeId").and_then(Value::as_str));

    let mut top = root_id.map(|id| builder.build(id)).unwrap_or_default();
    let root = match top.len() {
        0 => None,
        1 => top.pop(),
        // Root itself was irrelevant; keep the hoisted children under a synthetic root
        _ => Some(SnapshotNode {
            uid: String::new(),
            role: "RootWebArea".into(),
            name: String::new(),
            value: None,
            description: None,
            backend_node_id: None,
            rect: None,
            attributes: BTreeMap::new(),
            depth: 0,
            children: top
                .into_iter()
                .map(|mut child| {
                    shift_depth(&mut child, 1);
                    child
                })
                .collect(),
        }),
    };

    PageSnapshot {
        page_id,
        generation,
        verbose,
        root,
        index: builder.index,
    }
}

fn shift_depth(node: &mut SnapshotNode, by: usize) {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        node.depth += by;
        stack.extend(node.children.iter_mut());
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    fn ax(id: &str, role: &str, name: &str, backend: i64, children: &[&str]) -> Value {
        json!({
            "nodeId": id,
            "ignored": false,
            "role": {"type": "role", "value": role},
            "name": {"type": "computedString", "value": name},
            "backendDOMNodeId": backend,
            "childIds": children,
        })
    }

    /// RootWebArea > [heading, generic > [button, textbox], link]
    pub fn login_page() -> Value {
        let mut textbox = ax("5", "textbox", "Email", 105, &[]);
        textbox["properties"] = json!([
            {"name": "focusable", "value": {"type": "booleanOrUndefined", "value": true}},
            {"name": "required", "value": {"type": "boolean", "value": true}},
            {"name": "disabled", "value": {"type": "boolean", "value": false}}
        ]);
        let mut generic = ax("3", "generic", "", 103, &["4", "5"]);
        generic["parentId"] = json!("1");
        json!({"nodes": [
            ax("1", "RootWebArea", "Login", 101, &["2", "3", "6"]),
            ax("2", "heading", "Sign in", 102, &[]),
            generic,
            ax("4", "button", "Submit", 104, &[]),
            textbox,
            ax("6", "link", "Forgot password?", 106, &[]),
        ]})
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::login_page;
    use super::*;
    use serde_json::json;

    fn fix_parents(mut tree: Value) -> Value {
        // only the root lacks parentId
        for node in tree["nodes"].as_array_mut().unwrap().iter_mut().skip(1) {
            node["parentId"] = json!("x");
        }
        tree
    }

    #[test]
    fn compact_snapshot_hoists_structural_nodes() {
        let snap = build_snapshot(1, 7, &fix_parents(login_page()), &HashMap::new(), false);
        let root = snap.root.as_ref().unwrap();
        assert_eq!(root.role, "RootWebArea");
        let roles: Vec<&str> = root.children.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["heading", "button", "textbox", "link"]);
        assert!(root.children.iter().all(|c| c.depth == 1));
        assert_eq!(snap.node_count(), 5);
        assert!(snap.lookup("1_7_1").is_some());
    }

    #[test]
    fn verbose_snapshot_keeps_structure() {
        let snap = build_snapshot(1, 2, &fix_parents(login_page()), &HashMap::new(), true);
        let root = snap.root.as_ref().unwrap();
        let generic = root.children.iter().find(|c| c.role == "generic").unwrap();
        assert_eq!(generic.children.len(), 2);
        assert_eq!(generic.children[0].depth, 2);
        assert_eq!(snap.node_count(), 6);
    }

    #[test]
    fn attributes_drop_false_flags() {
        let snap = build_snapshot(1, 1, &fix_parents(login_page()), &HashMap::new(), false);
        let uid = snap.find_uid("textbox", "Email").unwrap();
        let node = snap.nodes().into_iter().find(|n| n.uid == uid).unwrap();
        assert!(node.attributes.contains_key("required"));
        assert!(!node.attributes.contains_key("disabled"));
        assert!(node.is_typeable());
        assert!(!node.is_clickable());
    }

    #[test]
    fn empty_tree_is_a_valid_snapshot() {
        let snap = build_snapshot(3, 1, &json!({"nodes": []}), &HashMap::new(), false);
        assert!(snap.root.is_none());
        assert!(snap.is_empty());
        let missing = build_snapshot(3, 2, &json!({}), &HashMap::new(), true);
        assert!(missing.is_empty());
    }

    /// RootWebArea > generic > generic > ... > button, `depth` generics deep
    fn nested_chain(depth: usize) -> Value {
        let mut nodes = vec![json!({
            "nodeId": "root",
            "role": {"value": "RootWebArea"},
            "name": {"value": "Deep"},
            "childIds": ["g0"],
        })];
        for i in 0..depth {
            let child = if i + 1 == depth { "leaf".to_string() } else { format!("g{}", i + 1) };
            nodes.push(json!({
                "nodeId": format!("g{}", i),
                "parentId": "root",
                "role": {"value": "generic"},
                "name": {"value": ""},
                "childIds": [child],
            }));
        }
        nodes.push(json!({
            "nodeId": "leaf",
            "parentId": "g",
            "role": {"value": "button"},
            "name": {"value": "Bottom"},
            "backendDOMNodeId": 7,
        }));
        json!({ "nodes": nodes })
    }

    #[test]
    fn deeply_nested_pages_fit_a_worker_stack() {
        let tree = nested_chain(20_000);
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let verbose = build_snapshot(1, 1, &tree, &HashMap::new(), true);
                let compact = build_snapshot(1, 2, &tree, &HashMap::new(), false);
                let deepest = verbose.nodes().iter().map(|n| n.depth).max();
                let compact_roles: Vec<String> = compact
                    .root
                    .as_ref()
                    .map(|r| r.children.iter().map(|c| c.role.clone()).collect())
                    .unwrap_or_default();
                (verbose.node_count(), deepest, compact.node_count(), compact_roles)
            })
            .unwrap();
        let (verbose_count, deepest, compact_count, compact_roles) = handle.join().unwrap();
        assert_eq!(verbose_count, 20_002);
        assert_eq!(deepest, Some(20_001));
        assert_eq!(compact_count, 2);
        assert_eq!(compact_roles, vec!["button".to_string()]);
    }

    #[test]
    fn irrelevant_root_gets_a_synthetic_parent() {
        let tree = json!({"nodes": [
            {"nodeId": "1", "role": {"value": "generic"}, "name": {"value": ""}, "childIds": ["2", "3"]},
            {"nodeId": "2", "parentId": "1", "role": {"value": "button"}, "name": {"value": "A"}, "childIds": ["4"]},
            {"nodeId": "3", "parentId": "1", "role": {"value": "link"}, "name": {"value": "B"}},
            {"nodeId": "4", "parentId": "2", "role": {"value": "image"}, "name": {"value": "icon"}},
        ]});
        let snap = build_snapshot(1, 3, &tree, &HashMap::new(), false);
        let root = snap.root.as_ref().unwrap();
        assert!(root.uid.is_empty());
        let shape: Vec<(&str, usize)> = snap.nodes().iter().skip(1).map(|n| (n.name.as_str(), n.depth)).collect();
        assert_eq!(shape, vec![("A", 1), ("icon", 2), ("B", 1)]);
        // Numbered in document order
        assert_eq!(snap.find_uid("link", "B").as_deref(), Some("1_3_3"));
    }

    #[test]
    fn uids_round_trip_page_and_generation() {
        assert_eq!(parse_uid(&format_uid(4, 19, 3)), Some((4, 19)));
        assert_eq!(parse_uid("e12"), None);
        assert_eq!(parse_uid("1_2"), None);
        assert_eq!(parse_uid("1_x_3"), None);
    }

    #[test]
    fn rects_come_from_layout_capture() {
        let capture = json!({"documents": [{
            "nodes": {"backendNodeId": [101, 104]},
            "layout": {"nodeIndex": [1], "bounds": [[10.0, 20.0, 80.0, 30.0]]}
        }]});
        let rects = layout_rects(&capture);
        assert_eq!(rects.get(&104).unwrap().width, 80.0);
        let snap = build_snapshot(1, 1, &fix_parents(login_page()), &rects, false);
        let button = snap.nodes().into_iter().find(|n| n.role == "button").unwrap();
        assert_eq!(button.rect.unwrap().x, 10.0);
    }
}
