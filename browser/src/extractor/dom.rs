use std::collections::HashMap;

use serde_json::Value;
use serde_json::json;
use tracing::warn;

use super::RawExtraction;
use crate::cdp::SharedCdpClient;

/// One DOM node as reported by `DOM.getDocument`. `node_id` is the
/// ephemeral per-session id the CSS domain wants; `backend_node_id` is the
/// stable-within-document identity everything else is keyed by.
#[derive(Debug, Clone)]
pub struct RawDomNode {
    pub node_id: u64,
    pub backend_node_id: u64,
    pub node_name: String,
    pub node_type: u64,
    pub attributes: HashMap<String, String>,
    /// Character data for text nodes.
    pub node_value: Option<String>,
    pub parent_backend_id: Option<u64>,
    pub frame_id: Option<String>,
}

impl RawDomNode {
    pub fn tag(&self) -> String {
        self.node_name.to_ascii_lowercase()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

pub(super) async fn extract_dom(client: &SharedCdpClient, out: &mut RawExtraction) {
    let response = client
        .send("DOM.getDocument", json!({ "depth": -1, "pierce": true }))
        .await;

    let document = match response {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "DOM.getDocument failed");
            out.warnings.push(format!("dom extraction failed: {err}"));
            return;
        }
    };

    let Some(root) = document.get("root") else {
        out.warnings
            .push("dom extraction returned no document root".to_string());
        return;
    };

    walk(root, None, None, out);
}

fn walk(
    node: &Value,
    parent_backend_id: Option<u64>,
    frame_id: Option<&str>,
    out: &mut RawExtraction,
) {
    let Some(backend_node_id) = node.get("backendNodeId").and_then(Value::as_u64) else {
        return;
    };

    // Frame-owner elements carry the owned frame's id; their content
    // document and everything below it belongs to that frame.
    let own_frame = node
        .get("frameId")
        .and_then(Value::as_str)
        .or(frame_id)
        .map(str::to_string);

    let raw = RawDomNode {
        node_id: node.get("nodeId").and_then(Value::as_u64).unwrap_or(0),
        backend_node_id,
        node_name: node
            .get("nodeName")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        node_type: node.get("nodeType").and_then(Value::as_u64).unwrap_or(1),
        attributes: attribute_pairs(node),
        node_value: node
            .get("nodeValue")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string),
        parent_backend_id,
        frame_id: own_frame.clone(),
    };
    out.dom.insert(backend_node_id, raw);
    out.dom_order.push(backend_node_id);

    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            walk(child, Some(backend_node_id), own_frame.as_deref(), out);
        }
    }

    // Pierced iframe documents hang off `contentDocument` and keep the
    // owning element's frame id.
    if let Some(content) = node.get("contentDocument") {
        walk(content, Some(backend_node_id), own_frame.as_deref(), out);
    }

    if let Some(shadow_roots) = node.get("shadowRoots").and_then(Value::as_array) {
        for shadow_root in shadow_roots {
            walk(shadow_root, Some(backend_node_id), own_frame.as_deref(), out);
        }
    }
}

/// CDP flattens attributes into `[name, value, name, value, ...]`.
fn attribute_pairs(node: &Value) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    if let Some(flat) = node.get("attributes").and_then(Value::as_array) {
        let mut it = flat.iter();
        while let (Some(name), Some(value)) = (it.next(), it.next()) {
            if let (Some(name), Some(value)) = (name.as_str(), value.as_str()) {
                attrs.insert(name.to_string(), value.to_string());
            }
        }
    }
    attrs
}
