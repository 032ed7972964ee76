//! Acting on a resolved snapshot node through its page's CDP session.

use serde_json::{Value, json};

use super::{Rect, ResolvedNode};
use crate::cdp::PageSession;
use crate::utils::{ToolError, ToolResult};

/// Messages the browser uses when a backend node no longer exists
const NODE_GONE: &[&str] = &[
    "No node with given id",
    "Could not find node",
    "Node is detached",
    "detached from document",
    "Cannot find context with specified id",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A live DOM element behind a snapshot uid
pub struct ElementHandle {
    session: PageSession,
    uid: String,
    backend_node_id: i64,
    object_id: String,
}

impl ElementHandle {
    /// Bind a resolved node to a remote object on the page
    pub async fn attach(session: PageSession, node: &ResolvedNode) -> ToolResult<Self> {
        let backend_node_id = node.node.backend_node_id.ok_or_else(|| {
            ToolError::validation(format!(
                "Element {} ({} \"{}\") has no DOM node to act on",
                node.uid, node.node.role, node.node.name
            ))
        })?;

        let resolved = session
            .send("DOM.resolveNode", json!({ "backendNodeId": backend_node_id }))
            .await
            .map_err(|e| stale_or(e, &node.uid))?;

        let object_id = resolved
            .pointer("/object/objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::StaleElementReference(node.uid.clone()))?
            .to_string();

        Ok(Self {
            session,
            uid: node.uid.clone(),
            backend_node_id,
            object_id,
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn backend_node_id(&self) -> i64 {
        self.backend_node_id
    }

    /// Remote object id, usable as a `Runtime.callFunctionOn` argument
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    async fn send(&self, method: &str, params: Value) -> ToolResult<Value> {
        self.session
            .send(method, params)
            .await
            .map_err(|e| stale_or(e, &self.uid))
    }

    pub async fn scroll_into_view(&self) -> ToolResult<()> {
        self.send(
            "DOM.scrollIntoViewIfNeeded",
            json!({ "backendNodeId": self.backend_node_id }),
        )
        .await?;
        Ok(())
    }

    /// Center of the element's content box in viewport coordinates
    pub async fn center(&self) -> ToolResult<Point> {
        let model = self
            .send(
                "DOM.getBoxModel",
                json!({ "backendNodeId": self.backend_node_id }),
            )
            .await?;
        quad_center(model.pointer("/model/content")).ok_or_else(|| {
            ToolError::action(format!("Element {} is not rendered", self.uid))
        })
    }

    /// Border box in page coordinates, for clipped screenshots
    pub async fn bounds(&self) -> ToolResult<Rect> {
        let model = self
            .send(
                "DOM.getBoxModel",
                json!({ "backendNodeId": self.backend_node_id }),
            )
            .await?;
        quad_bounds(model.pointer("/model/border")).ok_or_else(|| {
            ToolError::action(format!("Element {} is not rendered", self.uid))
        })
    }

    async fn mouse(&self, kind: &str, at: Point, click_count: u32) -> ToolResult<()> {
        let mut params = json!({ "type": kind, "x": at.x, "y": at.y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(click_count);
        }
        self.send("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }

    pub async fn click(&self, double: bool) -> ToolResult<Point> {
        self.scroll_into_view().await?;
        let at = self.center().await?;
        self.mouse("mouseMoved", at, 0).await?;
        let presses = if double { 2 } else { 1 };
        for count in 1..=presses {
            self.mouse("mousePressed", at, count).await?;
            self.mouse("mouseReleased", at, count).await?;
        }
        Ok(at)
    }

    pub async fn hover(&self) -> ToolResult<Point> {
        self.scroll_into_view().await?;
        let at = self.center().await?;
        self.mouse("mouseMoved", at, 0).await?;
        Ok(at)
    }

    /// Replace the element's value. Select elements pick the matching option;
    /// everything else is cleared and typed into.
    pub async fn fill(&self, text: &str) -> ToolResult<()> {
        self.scroll_into_view().await?;
        self.send("DOM.focus", json!({ "backendNodeId": self.backend_node_id }))
            .await?;

        let prepared = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": self.object_id,
                    "functionDeclaration": PREPARE_FILL,
                    "arguments": [{ "value": text }],
                    "returnByValue": true,
                }),
            )
            .await?;

        match prepared.pointer("/result/value").and_then(Value::as_str) {
            Some("selected") => Ok(()),
            Some("no-option") => Err(ToolError::action(format!(
                "Element {} has no option matching \"{}\"",
                self.uid, text
            ))),
            _ => {
                self.send("Input.insertText", json!({ "text": text })).await?;
                Ok(())
            }
        }
    }

    /// Scroll the element's own content, or the page around it
    pub async fn scroll_by(&self, dx: f64, dy: f64) -> ToolResult<()> {
        self.scroll_into_view().await?;
        let at = self.center().await?;
        self.send(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseWheel", "x": at.x, "y": at.y, "deltaX": dx, "deltaY": dy }),
        )
        .await?;
        Ok(())
    }
}

const PREPARE_FILL: &str = r#"function(value) {
    if (this.tagName === 'SELECT') {
        const option = Array.from(this.options).find(o => o.value === value || o.label === value || o.text === value);
        if (!option) return 'no-option';
        this.value = option.value;
        this.dispatchEvent(new Event('input', { bubbles: true }));
        this.dispatchEvent(new Event('change', { bubbles: true }));
        return 'selected';
    }
    if ('value' in this) {
        this.value = '';
        this.dispatchEvent(new Event('input', { bubbles: true }));
    } else if (this.isContentEditable) {
        this.textContent = '';
    }
    return 'cleared';
}"#;

fn stale_or(err: ToolError, uid: &str) -> ToolError {
    match &err {
        ToolError::BackendAction(message) if NODE_GONE.iter().any(|m| message.contains(m)) => {
            ToolError::StaleElementReference(uid.to_string())
        }
        _ => err,
    }
}

fn quad_center(quad: Option<&Value>) -> Option<Point> {
    let points: Vec<f64> = quad?.as_array()?.iter().filter_map(Value::as_f64).collect();
    if points.len() < 8 {
        return None;
    }
    let x = (points[0] + points[2] + points[4] + points[6]) / 4.0;
    let y = (points[1] + points[3] + points[5] + points[7]) / 4.0;
    Some(Point { x, y })
}

fn quad_bounds(quad: Option<&Value>) -> Option<Rect> {
    let points: Vec<f64> = quad?.as_array()?.iter().filter_map(Value::as_f64).collect();
    if points.len() < 8 {
        return None;
    }
    let xs = [points[0], points[2], points[4], points[6]];
    let ys = [points[1], points[3], points[5], points[7]];
    let min = |v: &[f64; 4]| v.iter().copied().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64; 4]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Rect {
        x: min(&xs),
        y: min(&ys),
        width: max(&xs) - min(&xs),
        height: max(&ys) - min(&ys),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_of_content_quad() {
        let quad = json!([10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]);
        assert_eq!(quad_center(Some(&quad)), Some(Point { x: 60.0, y: 40.0 }));
        assert_eq!(quad_center(Some(&json!([1, 2]))), None);
        assert_eq!(quad_center(None), None);
    }

    #[test]
    fn bounds_of_border_quad() {
        let quad = json!([10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]);
        assert_eq!(
            quad_bounds(Some(&quad)),
            Some(Rect { x: 10.0, y: 20.0, width: 100.0, height: 40.0 })
        );
    }

    #[test]
    fn node_gone_errors_become_stale_references() {
        let gone = ToolError::BackendAction("DOM.resolveNode failed: No node with given id found".into());
        assert!(matches!(
            stale_or(gone, "1_2_3"),
            ToolError::StaleElementReference(uid) if uid == "1_2_3"
        ));

        let other = ToolError::BackendAction("Input.dispatchMouseEvent failed: bad".into());
        assert!(matches!(stale_or(other, "1_2_3"), ToolError::BackendAction(_)));
        assert!(matches!(stale_or(ToolError::Timeout(5), "x"), ToolError::Timeout(5)));
    }
}
