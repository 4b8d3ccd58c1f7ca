//! Snapshot data model: flat semantic nodes, frame identities, and the
//! scoped element references handed to agents.

use chrono::DateTime;
use chrono::Utc;
use pagedelta_protocol::ChangeType;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Frame identity. `loader_id` rotates on cross-document navigation and is
/// what scopes element references to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameState {
    pub frame_id: String,
    pub loader_id: String,
    pub url: String,
    pub is_main: bool,
}

/// A handle the agent can hold across snapshots. The loader component makes
/// it impossible for a ref to silently point into a newer document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedElementRef {
    pub backend_node_id: u64,
    pub frame_id: String,
    pub loader_id: String,
}

impl ScopedElementRef {
    pub fn composite_key(&self) -> CompositeNodeKey {
        CompositeNodeKey(format!(
            "{}:{}:{}",
            self.frame_id, self.loader_id, self.backend_node_id
        ))
    }
}

/// Canonical `frame_id:loader_id:backend_node_id` string used for identity
/// comparison across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeNodeKey(pub String);

impl std::fmt::Display for CompositeNodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    Button,
    Link,
    Input,
    Textarea,
    Select,
    Combobox,
    Checkbox,
    Radio,
    Switch,
    Slider,
    Tab,
    Menuitem,
    Heading,
    Paragraph,
    Image,
    List,
    Listitem,
    Table,
    Dialog,
    Section,
    Navigation,
    Form,
    Generic,
    Text,
}

impl NodeKind {
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            NodeKind::Button
                | NodeKind::Link
                | NodeKind::Input
                | NodeKind::Textarea
                | NodeKind::Select
                | NodeKind::Combobox
                | NodeKind::Checkbox
                | NodeKind::Radio
                | NodeKind::Switch
                | NodeKind::Slider
                | NodeKind::Tab
                | NodeKind::Menuitem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Region {
    Header,
    Nav,
    Main,
    Aside,
    Footer,
    Dialog,
    Form,
    Search,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ScreenZone {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
    BelowFold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }
}

/// Optional element state booleans; `None` means "not applicable", not
/// "false".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

impl NodeState {
    /// Names of the flags currently set, in a fixed order.
    pub fn active_flags(&self) -> Vec<String> {
        let pairs = [
            ("visible", self.visible),
            ("enabled", self.enabled),
            ("checked", self.checked),
            ("expanded", self.expanded),
            ("selected", self.selected),
            ("focused", self.focused),
            ("required", self.required),
            ("invalid", self.invalid),
            ("readonly", self.readonly),
        ];
        pairs
            .iter()
            .filter(|(_, value)| *value == Some(true))
            .map(|(name, _)| (*name).to_string())
            .collect()
    }
}

/// Attribute subset carried on a node; only set when present on the element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_modal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub primary: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alternates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlacement {
    pub region: Region,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_context: Option<String>,
}

impl Default for NodePlacement {
    fn default() -> Self {
        Self {
            region: Region::Unknown,
            group_path: None,
            heading_context: None,
        }
    }
}

/// The unit of a snapshot: one semantic element fused from DOM,
/// accessibility, layout, and computed-style data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadableNode {
    /// Synthetic id, unique within one snapshot only.
    pub node_id: u64,
    pub backend_node_id: u64,
    pub frame_id: String,
    pub loader_id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "where")]
    pub placement: NodePlacement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_zone: Option<ScreenZone>,
    pub visible: bool,
    pub state: NodeState,
    pub attrs: NodeAttributes,
    pub find: Locator,
    /// Nearest snapshot ancestor, for overlay subtree membership. Not part
    /// of the wire shape.
    #[serde(skip)]
    pub parent_backend_id: Option<u64>,
}

impl ReadableNode {
    pub fn scoped_ref(&self) -> ScopedElementRef {
        ScopedElementRef {
            backend_node_id: self.backend_node_id,
            frame_id: self.frame_id.clone(),
            loader_id: self.loader_id.clone(),
        }
    }

    pub fn composite_key(&self) -> CompositeNodeKey {
        self.scoped_ref().composite_key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub node_count: usize,
    pub interactive_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseSnapshot {
    pub snapshot_id: String,
    pub page_id: String,
    pub url: String,
    pub title: String,
    pub captured_at: DateTime<Utc>,
    pub viewport: Viewport,
    /// DOM pre-order.
    pub nodes: Vec<ReadableNode>,
    pub frames: Vec<FrameState>,
    pub meta: SnapshotMeta,
}

impl BaseSnapshot {
    pub fn node_by_key(&self, key: &CompositeNodeKey) -> Option<&ReadableNode> {
        self.nodes.iter().find(|node| &node.composite_key() == key)
    }

    /// Backend ids of `root` plus every node in its snapshot subtree.
    pub fn subtree_backend_ids(&self, root_backend_id: u64) -> Vec<u64> {
        let mut members = vec![root_backend_id];
        let mut changed = true;
        while changed {
            changed = false;
            for node in &self.nodes {
                if members.contains(&node.backend_node_id) {
                    continue;
                }
                if let Some(parent) = node.parent_backend_id {
                    if members.contains(&parent) {
                        members.push(node.backend_node_id);
                        changed = true;
                    }
                }
            }
        }
        members
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedNode {
    pub node_ref: ScopedElementRef,
    pub kind: NodeKind,
    pub previous_label: String,
    pub current_label: String,
    pub change_type: ChangeType,
}

/// Raw diff between two node lists plus the reliability estimate the state
/// machine uses to decide between `delta` and `full`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    pub added: Vec<ReadableNode>,
    pub removed: Vec<ScopedElementRef>,
    pub modified: Vec<ModifiedNode>,
    pub confidence: f64,
    pub change_ratio: f64,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn composite_key_is_frame_loader_backend() {
        let node_ref = ScopedElementRef {
            backend_node_id: 42,
            frame_id: "F1".to_string(),
            loader_id: "L1".to_string(),
        };
        assert_eq!(node_ref.composite_key().0, "F1:L1:42");
    }

    #[test]
    fn active_flags_keep_declaration_order() {
        let state = NodeState {
            visible: Some(true),
            enabled: Some(false),
            checked: Some(true),
            ..Default::default()
        };
        assert_eq!(state.active_flags(), vec!["visible", "checked"]);
    }

    #[test]
    fn node_kind_renders_lowercase() {
        assert_eq!(NodeKind::Menuitem.to_string(), "menuitem");
        assert_eq!(ScreenZone::BelowFold.to_string(), "below-fold");
    }
}
