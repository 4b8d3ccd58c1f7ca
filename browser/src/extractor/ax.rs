use std::collections::HashMap;

use serde_json::Value;
use serde_json::json;
use tracing::warn;

use super::RawExtraction;
use crate::cdp::SharedCdpClient;

/// One accessibility node, already filtered for `ignored=false`.
#[derive(Debug, Clone)]
pub struct RawAxNode {
    pub ax_id: String,
    pub role: Option<String>,
    pub name: Option<String>,
    pub ignored: bool,
    pub backend_dom_node_id: Option<u64>,
    /// AX properties by name; values keep their CDP JSON form.
    pub properties: HashMap<String, Value>,
    /// Current value for value-bearing roles (inputs, sliders).
    pub value: Option<String>,
}

impl RawAxNode {
    pub fn bool_property(&self, name: &str) -> Option<bool> {
        match self.properties.get(name)? {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => match text.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                // Tristate properties ("mixed") stay undetermined.
                _ => None,
            },
            _ => None,
        }
    }

    pub fn u64_property(&self, name: &str) -> Option<u64> {
        self.properties.get(name)?.as_u64()
    }
}

pub(super) async fn extract_ax(client: &SharedCdpClient, out: &mut RawExtraction) {
    let response = client.send("Accessibility.getFullAXTree", json!({})).await;

    let tree = match response {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Accessibility.getFullAXTree failed");
            out.warnings
                .push(format!("accessibility extraction failed: {err}"));
            return;
        }
    };

    let Some(nodes) = tree.get("nodes").and_then(Value::as_array) else {
        out.warnings
            .push("accessibility extraction returned no nodes".to_string());
        return;
    };

    for node in nodes {
        if node.get("ignored").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        out.ax.push(parse_ax_node(node));
    }
}

fn parse_ax_node(node: &Value) -> RawAxNode {
    let mut properties = HashMap::new();
    if let Some(list) = node.get("properties").and_then(Value::as_array) {
        for property in list {
            let Some(name) = property.get("name").and_then(Value::as_str) else {
                continue;
            };
            let value = property
                .get("value")
                .and_then(|wrapper| wrapper.get("value"))
                .cloned()
                .unwrap_or(Value::Null);
            properties.insert(name.to_string(), value);
        }
    }

    RawAxNode {
        ax_id: node
            .get("nodeId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        role: nested_value_str(node, "role"),
        name: nested_value_str(node, "name"),
        ignored: false,
        backend_dom_node_id: node.get("backendDOMNodeId").and_then(Value::as_u64),
        value: nested_value_str(node, "value"),
        properties,
    }
}

/// AX values arrive wrapped: `{"role": {"type": "role", "value": "button"}}`.
fn nested_value_str(node: &Value, field: &str) -> Option<String> {
    let inner = node.get(field)?.get("value")?;
    match inner {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
