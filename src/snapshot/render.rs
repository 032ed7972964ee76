//! Text views over a snapshot. Both are derived from the same tree.

use serde_json::Value;
use std::fmt::Write;

use super::tree::{PageSnapshot, SnapshotNode};

fn describe(node: &SnapshotNode) -> String {
    let mut line = format!("uid={} {}", node.uid, node.role);
    if !node.name.is_empty() {
        let _ = write!(line, " \"{}\"", node.name);
    }
    if let Some(value) = &node.value {
        let _ = write!(line, " value=\"{}\"", value);
    }
    for (key, value) in &node.attributes {
        match value {
            Value::Bool(true) => {
                let _ = write!(line, " {}", key);
            }
            Value::String(s) => {
                let _ = write!(line, " {}=\"{}\"", key, s);
            }
            other => {
                let _ = write!(line, " {}={}", key, other);
            }
        }
    }
    line
}

/// Indentation stops growing past this depth
const MAX_INDENT_DEPTH: usize = 64;

/// Hierarchical rendering, two spaces per nesting level
pub fn render_verbose(snapshot: &PageSnapshot) -> String {
    let mut out = String::new();
    for node in snapshot.nodes() {
        if node.uid.is_empty() {
            continue;
        }
        let indent = "  ".repeat(node.depth.min(MAX_INDENT_DEPTH));
        let _ = writeln!(out, "{}{}", indent, describe(node));
    }
    out
}

/// Flat rendering: page title, then clickable and typeable elements
pub fn render_simplified(snapshot: &PageSnapshot) -> String {
    let nodes = snapshot.nodes();
    let mut out = String::new();

    if let Some(root) = &snapshot.root
        && !root.name.is_empty()
    {
        let _ = writeln!(out, "Page: {}", root.name);
    }

    let clickable: Vec<&SnapshotNode> = nodes.iter().copied().filter(|n| n.is_clickable()).collect();
    let typeable: Vec<&SnapshotNode> = nodes.iter().copied().filter(|n| n.is_typeable()).collect();

    let _ = writeln!(out, "Clickable elements ({}):", clickable.len());
    for node in clickable {
        let _ = writeln!(out, "  {}", describe(node));
    }
    let _ = writeln!(out, "Typeable elements ({}):", typeable.len());
    for node in typeable {
        let _ = writeln!(out, "  {}", describe(node));
    }
    out
}

/// Rendering for the response: verbose snapshots keep their hierarchy
pub fn render(snapshot: &PageSnapshot) -> String {
    if snapshot.is_empty() {
        return "(empty page: no accessible elements)\n".to_string();
    }
    if snapshot.verbose {
        render_verbose(snapshot)
    } else {
        render_simplified(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tree::{build_snapshot, fixtures::login_page};
    use std::collections::HashMap;

    #[test]
    fn verbose_view_indents_by_depth() {
        let snap = build_snapshot(1, 1, &login_page(), &HashMap::new(), true);
        let text = render_verbose(&snap);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("uid=1_1_1 RootWebArea \"Login\""));
        assert!(lines.iter().any(|l| l.starts_with("    uid=") && l.contains("button \"Submit\"")));
    }

    #[test]
    fn simplified_view_separates_clickable_and_typeable() {
        let snap = build_snapshot(2, 5, &login_page(), &HashMap::new(), false);
        let text = render_simplified(&snap);
        assert!(text.starts_with("Page: Login\n"));
        let clickable = text.split("Typeable").next().unwrap();
        assert!(clickable.contains("button \"Submit\""));
        assert!(clickable.contains("link \"Forgot password?\""));
        assert!(!clickable.contains("textbox"));
        let typeable = text.split("Typeable").nth(1).unwrap();
        assert!(typeable.contains("textbox \"Email\" focusable required"));
    }

    #[test]
    fn empty_snapshot_renders_placeholder() {
        let snap = build_snapshot(1, 1, &serde_json::json!({"nodes": []}), &HashMap::new(), false);
        assert!(render(&snap).contains("empty page"));
    }
}
