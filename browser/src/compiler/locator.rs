use std::collections::HashMap;

use crate::extractor::RawDomNode;
use crate::model::Locator;
use crate::model::NodeKind;

const TEST_ID_ATTRS: [&str; 3] = ["data-testid", "data-test", "data-cy"];

/// Backslash-escape quotes (and backslashes) for attribute selectors.
pub(super) fn escape_attr_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn id_selector(id: &str) -> String {
    let simple = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if simple {
        format!("#{id}")
    } else {
        format!("[id=\"{}\"]", escape_attr_value(id))
    }
}

fn tag_path(node: &RawDomNode, dom: &HashMap<u64, RawDomNode>) -> String {
    let mut tags = vec![node.tag()];
    let mut cursor = node.parent_backend_id;
    while let Some(parent_id) = cursor {
        if tags.len() >= 4 {
            break;
        }
        let Some(parent) = dom.get(&parent_id) else {
            break;
        };
        let tag = parent.tag();
        if parent.node_type == 1 && tag != "html" && !tag.starts_with('#') {
            tags.push(tag);
        }
        cursor = parent.parent_backend_id;
    }
    tags.reverse();
    tags.join(" > ")
}

/// Build the stable-selector ladder:
/// test-id attributes, then `#id`, then `role=X[name="Y"]`, then a tag path.
pub(super) fn build_locator(
    node: &RawDomNode,
    dom: &HashMap<u64, RawDomNode>,
    kind: NodeKind,
    label: &str,
) -> Locator {
    let mut primary = None;

    for attr in TEST_ID_ATTRS {
        if let Some(value) = node.attr(attr) {
            primary = Some(format!("[{attr}=\"{}\"]", escape_attr_value(value)));
            break;
        }
    }

    if primary.is_none() {
        if let Some(id) = node.attr("id") {
            if !id.is_empty() {
                primary = Some(id_selector(id));
            }
        }
    }

    let role = node
        .attr("role")
        .map(str::to_string)
        .unwrap_or_else(|| kind.to_string());
    if primary.is_none() {
        primary = Some(if label.is_empty() {
            format!("role={role}")
        } else {
            format!("role={role}[name=\"{}\"]", escape_attr_value(label))
        });
    }

    let mut alternates = Vec::new();
    if let Some(aria_label) = node.attr("aria-label") {
        alternates.push(format!(
            "[aria-label=\"{}\"]",
            escape_attr_value(aria_label)
        ));
    }
    if let Some(name) = node.attr("name") {
        alternates.push(format!(
            "{}[name=\"{}\"]",
            node.tag(),
            escape_attr_value(name)
        ));
    }
    let path = tag_path(node, dom);
    if Some(&path) != primary.as_ref() {
        alternates.push(path);
    }

    Locator {
        primary: primary.unwrap_or_else(|| node.tag()),
        alternates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node_with_attrs(attrs: &[(&str, &str)]) -> RawDomNode {
        RawDomNode {
            node_id: 1,
            backend_node_id: 1,
            node_name: "BUTTON".to_string(),
            node_type: 1,
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            node_value: None,
            parent_backend_id: None,
            frame_id: None,
        }
    }

    #[test]
    fn test_id_beats_everything() {
        let node = node_with_attrs(&[("data-testid", "save"), ("id", "save-button")]);
        let locator = build_locator(&node, &HashMap::new(), NodeKind::Button, "Save");
        assert_eq!(locator.primary, "[data-testid=\"save\"]");
    }

    #[test]
    fn id_beats_role() {
        let node = node_with_attrs(&[("id", "save-button")]);
        let locator = build_locator(&node, &HashMap::new(), NodeKind::Button, "Save");
        assert_eq!(locator.primary, "#save-button");
    }

    #[test]
    fn role_name_selector_escapes_quotes() {
        let node = node_with_attrs(&[]);
        let locator = build_locator(&node, &HashMap::new(), NodeKind::Button, "Say \"hi\"");
        assert_eq!(locator.primary, "role=button[name=\"Say \\\"hi\\\"\"]");
    }

    #[test]
    fn alternates_carry_aria_label_and_name() {
        let node = node_with_attrs(&[("aria-label", "Close"), ("name", "close")]);
        let locator = build_locator(&node, &HashMap::new(), NodeKind::Button, "Close");
        assert!(locator.alternates.contains(&"[aria-label=\"Close\"]".to_string()));
        assert!(locator.alternates.contains(&"button[name=\"close\"]".to_string()));
    }

    #[test]
    fn awkward_ids_use_attribute_form() {
        let node = node_with_attrs(&[("id", "btn:save")]);
        let locator = build_locator(&node, &HashMap::new(), NodeKind::Button, "Save");
        assert_eq!(locator.primary, "[id=\"btn:save\"]");
    }
}
