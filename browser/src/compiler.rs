//! Fuses one extraction pass into a `BaseSnapshot`: classify kinds from AX
//! roles, attach layout and style, resolve regions, and build locators.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::extractor::RawAxNode;
use crate::extractor::RawExtraction;
use crate::model::BaseSnapshot;
use crate::model::FrameState;
use crate::model::NodeAttributes;
use crate::model::NodeKind;
use crate::model::NodePlacement;
use crate::model::NodeState;
use crate::model::ReadableNode;
use crate::model::Region;
use crate::model::ScreenZone;
use crate::model::SnapshotMeta;
use crate::model::Viewport;

mod kind;
mod locator;
mod region;

pub struct CompileInput {
    pub raw: RawExtraction,
    pub frames: Vec<FrameState>,
    pub viewport: Viewport,
    pub url: String,
    pub title: String,
    pub page_id: String,
}

pub struct SnapshotCompiler;

impl SnapshotCompiler {
    pub fn compile(input: CompileInput) -> BaseSnapshot {
        let CompileInput {
            raw,
            frames,
            viewport,
            url,
            title,
            page_id,
        } = input;

        let frame_by_id: HashMap<&str, &FrameState> = frames
            .iter()
            .map(|frame| (frame.frame_id.as_str(), frame))
            .collect();
        let main_frame = frames.iter().find(|frame| frame.is_main);

        // First AX node per backend id wins; later duplicates are AX-internal.
        let mut ax_by_backend: HashMap<u64, &RawAxNode> = HashMap::new();
        let mut ax_regions: HashMap<u64, Region> = HashMap::new();
        for ax_node in &raw.ax {
            let Some(backend_id) = ax_node.backend_dom_node_id else {
                continue;
            };
            ax_by_backend.entry(backend_id).or_insert(ax_node);
            if let Some(hint) = ax_node.role.as_deref().and_then(kind::region_for_role) {
                ax_regions.entry(backend_id).or_insert(hint);
            }
        }

        let mut nodes: Vec<ReadableNode> = Vec::new();
        let mut emitted: HashMap<u64, usize> = HashMap::new();
        let mut last_heading: Option<String> = None;
        let mut warnings = raw.warnings.clone();

        for &backend_id in &raw.dom_order {
            let Some(ax_node) = ax_by_backend.get(&backend_id) else {
                continue;
            };
            let Some(role) = ax_node.role.as_deref() else {
                continue;
            };
            let Some(node_kind) = kind::kind_for_role(role) else {
                continue;
            };
            let Some(dom_node) = raw.dom.get(&backend_id) else {
                continue;
            };

            let label = node_label(ax_node, dom_node);
            if label.is_empty()
                && matches!(node_kind, NodeKind::Text | NodeKind::Paragraph | NodeKind::Generic)
            {
                continue;
            }

            let parent_backend_id =
                nearest_emitted_ancestor(backend_id, &raw, &emitted);

            // A text leaf that only repeats its labelled parent adds noise.
            if node_kind == NodeKind::Text {
                if let Some(parent_id) = parent_backend_id {
                    if let Some(&parent_index) = emitted.get(&parent_id) {
                        if nodes[parent_index].label == label {
                            continue;
                        }
                    }
                }
            }

            let (frame_id, loader_id) = frame_identity(dom_node.frame_id.as_deref(), &frame_by_id, main_frame);

            let bbox = raw.layout.get(&backend_id).copied();
            let style = raw.styles.get(&backend_id);
            let visible = bbox.is_some() && !style.is_some_and(|s| s.hides_element());
            let screen_zone = bbox.map(|b| screen_zone_of(&b, &viewport));

            let state = node_state(ax_node, node_kind, visible);
            let attrs = node_attributes(ax_node, dom_node, node_kind);
            let find = locator::build_locator(dom_node, &raw.dom, node_kind, &label);
            let placement = NodePlacement {
                region: region::resolve_region(backend_id, &raw.dom, &ax_regions),
                group_path: group_path(parent_backend_id, &raw, &emitted, &nodes),
                heading_context: if node_kind == NodeKind::Heading {
                    None
                } else {
                    last_heading.clone()
                },
            };

            if node_kind == NodeKind::Heading && !label.is_empty() {
                last_heading = Some(label.clone());
            }

            let node = ReadableNode {
                node_id: nodes.len() as u64 + 1,
                backend_node_id: backend_id,
                frame_id,
                loader_id,
                kind: node_kind,
                label,
                role: Some(role.to_string()),
                placement,
                bbox,
                z_index: style.and_then(|s| s.z_index),
                display: style.and_then(|s| s.display.clone()),
                screen_zone,
                visible,
                state,
                attrs,
                find,
                parent_backend_id,
            };
            emitted.insert(backend_id, nodes.len());
            nodes.push(node);
        }

        if nodes.is_empty() {
            warnings.push(format!(
                "compiled zero nodes (url={url}, title={title}, dom_nodes={})",
                raw.dom.len()
            ));
        }

        let interactive_count = nodes.iter().filter(|n| n.kind.is_interactive()).count();
        debug!(
            nodes = nodes.len(),
            interactive = interactive_count,
            url = %url,
            "Snapshot compiled"
        );

        BaseSnapshot {
            snapshot_id: Uuid::new_v4().to_string(),
            page_id,
            url,
            title,
            captured_at: Utc::now(),
            viewport,
            meta: SnapshotMeta {
                node_count: nodes.len(),
                interactive_count,
                warnings,
            },
            nodes,
            frames,
        }
    }
}

fn node_label(ax_node: &RawAxNode, dom_node: &crate::extractor::RawDomNode) -> String {
    if let Some(name) = ax_node.name.as_deref() {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    for attr in ["aria-label", "alt", "value", "placeholder", "title"] {
        if let Some(value) = dom_node.attr(attr) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    dom_node
        .node_value
        .as_deref()
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

fn frame_identity(
    node_frame: Option<&str>,
    frame_by_id: &HashMap<&str, &FrameState>,
    main_frame: Option<&FrameState>,
) -> (String, String) {
    if let Some(frame_id) = node_frame {
        if let Some(frame) = frame_by_id.get(frame_id) {
            return (frame.frame_id.clone(), frame.loader_id.clone());
        }
    }
    match main_frame {
        Some(frame) => (frame.frame_id.clone(), frame.loader_id.clone()),
        None => (String::new(), String::new()),
    }
}

/// 3x3 grid by bbox center; anything whose center sits past the viewport
/// bottom is below the fold.
fn screen_zone_of(bbox: &crate::model::BBox, viewport: &Viewport) -> ScreenZone {
    let (cx, cy) = bbox.center();
    let height = f64::from(viewport.height);
    let width = f64::from(viewport.width);
    if cy >= height {
        return ScreenZone::BelowFold;
    }
    let column = ((cx / width.max(1.0) * 3.0) as i64).clamp(0, 2);
    let row = ((cy / height.max(1.0) * 3.0) as i64).clamp(0, 2);
    match (row, column) {
        (0, 0) => ScreenZone::TopLeft,
        (0, 1) => ScreenZone::TopCenter,
        (0, _) => ScreenZone::TopRight,
        (1, 0) => ScreenZone::MiddleLeft,
        (1, 1) => ScreenZone::Center,
        (1, _) => ScreenZone::MiddleRight,
        (_, 0) => ScreenZone::BottomLeft,
        (_, 1) => ScreenZone::BottomCenter,
        (_, _) => ScreenZone::BottomRight,
    }
}

fn node_state(ax_node: &RawAxNode, node_kind: NodeKind, visible: bool) -> NodeState {
    let checkable = matches!(
        node_kind,
        NodeKind::Checkbox | NodeKind::Radio | NodeKind::Switch | NodeKind::Menuitem
    );
    NodeState {
        visible: Some(visible),
        enabled: node_kind
            .is_interactive()
            .then(|| !ax_node.bool_property("disabled").unwrap_or(false)),
        checked: if checkable {
            ax_node.bool_property("checked")
        } else {
            None
        },
        expanded: ax_node.bool_property("expanded"),
        selected: ax_node.bool_property("selected"),
        focused: ax_node.bool_property("focused"),
        required: ax_node.bool_property("required"),
        invalid: ax_node.bool_property("invalid"),
        readonly: ax_node.bool_property("readonly"),
    }
}

fn node_attributes(
    ax_node: &RawAxNode,
    dom_node: &crate::extractor::RawDomNode,
    node_kind: NodeKind,
) -> NodeAttributes {
    let attr = |name: &str| dom_node.attr(name).map(str::to_string);
    NodeAttributes {
        input_type: (dom_node.tag() == "input").then(|| attr("type")).flatten(),
        value: ax_node.value.clone().or_else(|| attr("value")),
        placeholder: attr("placeholder"),
        href: attr("href"),
        alt: attr("alt"),
        src: attr("src"),
        heading_level: (node_kind == NodeKind::Heading)
            .then(|| ax_node.u64_property("level").map(|level| level as u8))
            .flatten(),
        role: attr("role"),
        test_id: attr("data-testid")
            .or_else(|| attr("data-test"))
            .or_else(|| attr("data-cy")),
        aria_modal: dom_node.attr("aria-modal").map(|value| value == "true"),
        class: attr("class"),
    }
}

fn nearest_emitted_ancestor(
    backend_id: u64,
    raw: &RawExtraction,
    emitted: &HashMap<u64, usize>,
) -> Option<u64> {
    let mut cursor = raw.dom.get(&backend_id)?.parent_backend_id;
    let mut hops = 0usize;
    while let Some(current) = cursor {
        if emitted.contains_key(&current) {
            return Some(current);
        }
        cursor = raw.dom.get(&current)?.parent_backend_id;
        hops += 1;
        if hops > raw.dom.len() {
            return None;
        }
    }
    None
}

/// Labelled container chain (outermost first) for `where.group_path`.
fn group_path(
    parent_backend_id: Option<u64>,
    raw: &RawExtraction,
    emitted: &HashMap<u64, usize>,
    nodes: &[ReadableNode],
) -> Option<Vec<String>> {
    let mut path = Vec::new();
    let mut cursor = parent_backend_id;
    let mut hops = 0usize;
    while let Some(current) = cursor {
        if let Some(&index) = emitted.get(&current) {
            let node = &nodes[index];
            let grouping = matches!(
                node.kind,
                NodeKind::Form
                    | NodeKind::Section
                    | NodeKind::List
                    | NodeKind::Table
                    | NodeKind::Dialog
                    | NodeKind::Navigation
            );
            if grouping && !node.label.is_empty() {
                path.push(node.label.clone());
            }
        }
        cursor = raw.dom.get(&current).and_then(|n| n.parent_backend_id);
        hops += 1;
        if hops > raw.dom.len() {
            break;
        }
    }
    if path.is_empty() {
        None
    } else {
        path.reverse();
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BBox;
    use crate::testutil::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn compiles_button_with_layout_and_locator() {
        let raw = fixtures::raw_page(&[fixtures::RawSpec {
            backend_id: 10,
            tag: "button",
            role: "button",
            name: "Submit",
            attrs: &[("id", "submit")],
            bbox: Some(BBox { x: 10.0, y: 10.0, w: 80.0, h: 30.0 }),
            ..Default::default()
        }]);
        let snapshot = SnapshotCompiler::compile(fixtures::compile_input(raw));

        assert_eq!(snapshot.nodes.len(), 1);
        let node = &snapshot.nodes[0];
        assert_eq!(node.kind, NodeKind::Button);
        assert_eq!(node.label, "Submit");
        assert_eq!(node.find.primary, "#submit");
        assert!(node.visible);
        assert_eq!(node.screen_zone, Some(ScreenZone::TopLeft));
        assert_eq!(node.state.enabled, Some(true));
        assert_eq!(snapshot.meta.interactive_count, 1);
        assert_eq!(node.loader_id, fixtures::MAIN_LOADER);
    }

    #[test]
    fn unrendered_nodes_are_invisible() {
        let raw = fixtures::raw_page(&[fixtures::RawSpec {
            backend_id: 10,
            tag: "button",
            role: "button",
            name: "Hidden",
            bbox: None,
            ..Default::default()
        }]);
        let snapshot = SnapshotCompiler::compile(fixtures::compile_input(raw));
        assert!(!snapshot.nodes[0].visible);
        assert_eq!(snapshot.nodes[0].screen_zone, None);
    }

    #[test]
    fn below_fold_detection_uses_center() {
        let raw = fixtures::raw_page(&[fixtures::RawSpec {
            backend_id: 10,
            tag: "a",
            role: "link",
            name: "Later",
            bbox: Some(BBox { x: 10.0, y: 900.0, w: 50.0, h: 20.0 }),
            ..Default::default()
        }]);
        let snapshot = SnapshotCompiler::compile(fixtures::compile_input(raw));
        assert_eq!(snapshot.nodes[0].screen_zone, Some(ScreenZone::BelowFold));
    }

    #[test]
    fn empty_compilation_records_diagnostics() {
        let raw = fixtures::raw_page(&[]);
        let snapshot = SnapshotCompiler::compile(fixtures::compile_input(raw));
        assert!(snapshot.nodes.is_empty());
        assert!(
            snapshot
                .meta
                .warnings
                .iter()
                .any(|warning| warning.contains("compiled zero nodes"))
        );
    }
}
