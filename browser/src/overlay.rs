//! Overlay detection: decide whether a fresh snapshot opened, closed, or
//! replaced a modal-like layer, so the state machine can freeze the base
//! baseline underneath it.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use pagedelta_protocol::OverlayKind;

use crate::model::BaseSnapshot;
use crate::model::NodeKind;
use crate::model::ReadableNode;
use crate::model::Region;
use crate::model::ScopedElementRef;
use crate::version::hash_nodes;

/// Class names that mark an elevated layer as overlay-like.
static OVERLAY_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)modal|dialog|popover|overlay|drawer").unwrap_or_else(|_| {
        // The pattern is a literal; this cannot fail at runtime.
        unreachable!("overlay class pattern is valid")
    })
});

static DROPDOWN_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)dropdown|menu|listbox|select").unwrap_or_else(|_| unreachable!()));

static TOOLTIP_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)tooltip|popover|hint").unwrap_or_else(|_| unreachable!()));

const OVERLAY_Z_INDEX_FLOOR: i64 = 999;

#[derive(Debug, Clone)]
pub struct OverlayState {
    pub root_ref: ScopedElementRef,
    pub overlay_type: OverlayKind,
    /// Overlay content (root plus subtree) at the time it was observed.
    pub nodes: Vec<ReadableNode>,
    pub content_hash: String,
    pub detection_confidence: f64,
    /// Every ref the agent may have received for this overlay.
    pub captured_refs: Vec<ScopedElementRef>,
}

#[derive(Debug, Clone)]
pub enum OverlayChange {
    NoOverlayChange,
    Opened(OverlayState),
    Closed(OverlayState),
    Replaced {
        previous: OverlayState,
        current: OverlayState,
    },
}

#[derive(Default)]
pub struct OverlayDetector;

impl OverlayDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        previous: Option<&OverlayState>,
        current: &BaseSnapshot,
    ) -> OverlayChange {
        let roots = overlay_roots(current);
        let dominant = dominant_root(&roots);

        match (previous, dominant) {
            (None, None) => OverlayChange::NoOverlayChange,
            (None, Some(root)) => {
                let state = build_state(root, current);
                debug!(
                    root = %state.root_ref.composite_key(),
                    overlay_type = %state.overlay_type,
                    nodes = state.nodes.len(),
                    "Overlay opened"
                );
                OverlayChange::Opened(state)
            }
            (Some(open), None) => OverlayChange::Closed(open.clone()),
            (Some(open), Some(root)) => {
                if root.composite_key() == open.root_ref.composite_key() {
                    // Same overlay; content drift travels the delta path.
                    OverlayChange::NoOverlayChange
                } else {
                    OverlayChange::Replaced {
                        previous: open.clone(),
                        current: build_state(root, current),
                    }
                }
            }
        }
    }
}

/// Refresh the tracked content of the overlay that is already open.
pub fn refresh_state(open: &OverlayState, current: &BaseSnapshot) -> Option<OverlayState> {
    let root = current
        .nodes
        .iter()
        .find(|node| node.composite_key() == open.root_ref.composite_key())?;
    Some(build_state(root, current))
}

/// Nodes inside the current overlay subtree, root included.
pub fn overlay_nodes<'a>(state: &OverlayState, snapshot: &'a BaseSnapshot) -> Vec<&'a ReadableNode> {
    let members = snapshot.subtree_backend_ids(state.root_ref.backend_node_id);
    snapshot
        .nodes
        .iter()
        .filter(|node| members.contains(&node.backend_node_id))
        .collect()
}

/// Base-layer nodes: everything outside the overlay subtree.
pub fn base_nodes<'a>(
    state: Option<&OverlayState>,
    snapshot: &'a BaseSnapshot,
) -> Vec<&'a ReadableNode> {
    match state {
        None => snapshot.nodes.iter().collect(),
        Some(open) => {
            let members = snapshot.subtree_backend_ids(open.root_ref.backend_node_id);
            snapshot
                .nodes
                .iter()
                .filter(|node| !members.contains(&node.backend_node_id))
                .collect()
        }
    }
}

fn is_overlay_root(node: &ReadableNode) -> bool {
    if node.kind == NodeKind::Dialog {
        return true;
    }
    let role_is_dialog = matches!(node.role.as_deref(), Some("dialog") | Some("alertdialog"));
    if role_is_dialog && node.attrs.aria_modal == Some(true) {
        return true;
    }
    if node.placement.region == Region::Dialog {
        return true;
    }
    if node.z_index.unwrap_or(0) >= OVERLAY_Z_INDEX_FLOOR {
        if let Some(class) = node.attrs.class.as_deref() {
            if OVERLAY_CLASS.is_match(class) {
                return true;
            }
        }
    }
    false
}

/// Matching nodes whose ancestors do not also match; those are the layer
/// roots rather than layer content.
fn overlay_roots(snapshot: &BaseSnapshot) -> Vec<&ReadableNode> {
    let matches: Vec<&ReadableNode> = snapshot.nodes.iter().filter(|n| is_overlay_root(n)).collect();
    let matched_ids: Vec<u64> = matches.iter().map(|n| n.backend_node_id).collect();

    matches
        .iter()
        .filter(|node| {
            let mut cursor = node.parent_backend_id;
            let mut hops = 0usize;
            while let Some(parent) = cursor {
                if matched_ids.contains(&parent) {
                    return false;
                }
                cursor = snapshot
                    .nodes
                    .iter()
                    .find(|n| n.backend_node_id == parent)
                    .and_then(|n| n.parent_backend_id);
                hops += 1;
                if hops > snapshot.nodes.len() {
                    break;
                }
            }
            true
        })
        .copied()
        .collect()
}

/// Highest z-index wins; ties break toward the larger painted area.
fn dominant_root<'a>(roots: &[&'a ReadableNode]) -> Option<&'a ReadableNode> {
    roots.iter().copied().max_by(|a, b| {
        let za = a.z_index.unwrap_or(0);
        let zb = b.z_index.unwrap_or(0);
        za.cmp(&zb).then_with(|| {
            let area_a = a.bbox.map(|bb| bb.area()).unwrap_or(0.0);
            let area_b = b.bbox.map(|bb| bb.area()).unwrap_or(0.0);
            area_a.total_cmp(&area_b)
        })
    })
}

fn classify_type(node: &ReadableNode) -> OverlayKind {
    if node.attrs.aria_modal == Some(true) {
        return OverlayKind::Modal;
    }
    if matches!(node.role.as_deref(), Some("dialog") | Some("alertdialog")) {
        return OverlayKind::Dialog;
    }
    if let Some(class) = node.attrs.class.as_deref() {
        if DROPDOWN_CLASS.is_match(class) {
            return OverlayKind::Dropdown;
        }
        if TOOLTIP_CLASS.is_match(class) {
            return OverlayKind::Tooltip;
        }
    }
    OverlayKind::Unknown
}

fn detection_confidence(node: &ReadableNode) -> f64 {
    if node.kind == NodeKind::Dialog && node.attrs.aria_modal == Some(true) {
        1.0
    } else if node.kind == NodeKind::Dialog
        || matches!(node.role.as_deref(), Some("dialog") | Some("alertdialog"))
    {
        0.9
    } else if node.placement.region == Region::Dialog {
        0.8
    } else {
        0.6
    }
}

fn build_state(root: &ReadableNode, snapshot: &BaseSnapshot) -> OverlayState {
    let members = snapshot.subtree_backend_ids(root.backend_node_id);
    let nodes: Vec<ReadableNode> = snapshot
        .nodes
        .iter()
        .filter(|node| members.contains(&node.backend_node_id))
        .cloned()
        .collect();
    let captured_refs = nodes.iter().map(ReadableNode::scoped_ref).collect();
    OverlayState {
        root_ref: root.scoped_ref(),
        overlay_type: classify_type(root),
        content_hash: hash_nodes(&nodes),
        detection_confidence: detection_confidence(root),
        captured_refs,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixtures;
    use pretty_assertions::assert_eq;

    fn dialog_root(backend_id: u64) -> ReadableNode {
        let mut node = fixtures::node(backend_id, NodeKind::Dialog, "Confirm");
        node.role = Some("dialog".to_string());
        node.attrs.aria_modal = Some(true);
        node
    }

    #[test]
    fn modal_dialog_opens_overlay() {
        let base = fixtures::snapshot_with(vec![fixtures::node(10, NodeKind::Button, "A")]);
        let detector = OverlayDetector::new();
        assert!(matches!(
            detector.detect(None, &base),
            OverlayChange::NoOverlayChange
        ));

        let mut child = fixtures::node(21, NodeKind::Button, "B");
        child.parent_backend_id = Some(20);
        let with_dialog = fixtures::snapshot_with(vec![
            fixtures::node(10, NodeKind::Button, "A"),
            dialog_root(20),
            child,
        ]);

        match detector.detect(None, &with_dialog) {
            OverlayChange::Opened(state) => {
                assert_eq!(state.overlay_type, OverlayKind::Modal);
                assert_eq!(state.root_ref.backend_node_id, 20);
                let labels: Vec<&str> =
                    state.nodes.iter().map(|n| n.label.as_str()).collect();
                assert_eq!(labels, vec!["Confirm", "B"]);
                assert!(state.detection_confidence >= 0.9);
            }
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[test]
    fn closing_returns_previous_state() {
        let mut child = fixtures::node(21, NodeKind::Button, "B");
        child.parent_backend_id = Some(20);
        let with_dialog = fixtures::snapshot_with(vec![
            fixtures::node(10, NodeKind::Button, "A"),
            dialog_root(20),
            child,
        ]);
        let detector = OverlayDetector::new();
        let opened = match detector.detect(None, &with_dialog) {
            OverlayChange::Opened(state) => state,
            other => panic!("expected Opened, got {other:?}"),
        };

        let base_again = fixtures::snapshot_with(vec![fixtures::node(10, NodeKind::Button, "A")]);
        match detector.detect(Some(&opened), &base_again) {
            OverlayChange::Closed(state) => {
                assert_eq!(state.root_ref.backend_node_id, 20);
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn new_root_identity_means_replaced() {
        let detector = OverlayDetector::new();
        let first = fixtures::snapshot_with(vec![dialog_root(20)]);
        let opened = match detector.detect(None, &first) {
            OverlayChange::Opened(state) => state,
            other => panic!("expected Opened, got {other:?}"),
        };

        let second = fixtures::snapshot_with(vec![dialog_root(30)]);
        match detector.detect(Some(&opened), &second) {
            OverlayChange::Replaced { previous, current } => {
                assert_eq!(previous.root_ref.backend_node_id, 20);
                assert_eq!(current.root_ref.backend_node_id, 30);
            }
            other => panic!("expected Replaced, got {other:?}"),
        }
    }

    #[test]
    fn same_root_is_no_change() {
        let detector = OverlayDetector::new();
        let first = fixtures::snapshot_with(vec![dialog_root(20)]);
        let opened = match detector.detect(None, &first) {
            OverlayChange::Opened(state) => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert!(matches!(
            detector.detect(Some(&opened), &first),
            OverlayChange::NoOverlayChange
        ));
    }

    #[test]
    fn elevated_classed_layer_counts_as_overlay() {
        let mut layer = fixtures::node(40, NodeKind::Section, "Cart");
        layer.z_index = Some(1000);
        layer.attrs.class = Some("drawer drawer--right".to_string());
        let snapshot = fixtures::snapshot_with(vec![layer]);

        let detector = OverlayDetector::new();
        match detector.detect(None, &snapshot) {
            OverlayChange::Opened(state) => {
                assert_eq!(state.root_ref.backend_node_id, 40);
            }
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[test]
    fn low_z_index_classed_layer_is_not_overlay() {
        let mut layer = fixtures::node(40, NodeKind::Section, "Cart");
        layer.z_index = Some(10);
        layer.attrs.class = Some("drawer".to_string());
        let snapshot = fixtures::snapshot_with(vec![layer]);
        let detector = OverlayDetector::new();
        assert!(matches!(
            detector.detect(None, &snapshot),
            OverlayChange::NoOverlayChange
        ));
    }
}
