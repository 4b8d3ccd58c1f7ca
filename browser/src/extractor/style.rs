use serde_json::Value;
use serde_json::json;

use super::RawExtraction;
use crate::cdp::SharedCdpClient;

/// Computed-style subset the compiler consumes. Absent fields default to
/// the rendered state ("visible").
#[derive(Debug, Clone, Default)]
pub struct RawStyle {
    pub display: Option<String>,
    pub visibility: Option<String>,
    pub z_index: Option<i64>,
}

impl RawStyle {
    pub fn hides_element(&self) -> bool {
        self.display.as_deref() == Some("none") || self.visibility.as_deref() == Some("hidden")
    }
}

/// `CSS.getComputedStyleForNode` wants the ephemeral DOM `nodeId`, not the
/// backend id; the DOM index supplies the translation. Failures are
/// tolerated per node.
pub(super) async fn extract_styles(
    client: &SharedCdpClient,
    candidates: &[u64],
    out: &mut RawExtraction,
) {
    for &backend_node_id in candidates {
        let Some(dom_node) = out.dom.get(&backend_node_id) else {
            continue;
        };
        if dom_node.node_id == 0 {
            continue;
        }
        let response = client
            .send(
                "CSS.getComputedStyleForNode",
                json!({ "nodeId": dom_node.node_id }),
            )
            .await;
        let Ok(value) = response else {
            continue;
        };
        out.styles
            .insert(backend_node_id, style_from_response(&value));
    }
}

fn style_from_response(value: &Value) -> RawStyle {
    let mut style = RawStyle::default();
    let Some(entries) = value.get("computedStyle").and_then(Value::as_array) else {
        return style;
    };
    for entry in entries {
        let (Some(name), Some(prop_value)) = (
            entry.get("name").and_then(Value::as_str),
            entry.get("value").and_then(Value::as_str),
        ) else {
            continue;
        };
        match name {
            "display" => style.display = Some(prop_value.to_string()),
            "visibility" => style.visibility = Some(prop_value.to_string()),
            "z-index" => style.z_index = prop_value.parse::<i64>().ok(),
            _ => {}
        }
    }
    style
}
