use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Response union delivered after every capture. Consumers match on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Full {
        summary: String,
        /// Rendered text view of the snapshot; derived from the same nodes
        /// the structured payloads expose.
        snapshot: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    NoChange {
        summary: String,
    },
    Delta {
        summary: String,
        context: DeltaContext,
        counts: DeltaCounts,
        invalidated_refs: Vec<String>,
        added: Vec<NodeSummary>,
        modified: Vec<ModifiedSummary>,
        removed_refs: Vec<String>,
    },
    OverlayOpened {
        summary: String,
        invalidated_refs: Vec<String>,
        counts: DeltaCounts,
        overlay: OverlayInfo,
        nodes: Vec<NodeSummary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        transition: Option<OverlayTransition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_overlay: Option<PreviousOverlay>,
    },
    OverlayClosed {
        summary: String,
        overlay: OverlayInfo,
        invalidated_refs: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base_changes: Option<BaseChanges>,
    },
}

impl ResponsePayload {
    pub fn summary(&self) -> &str {
        match self {
            ResponsePayload::Full { summary, .. }
            | ResponsePayload::NoChange { summary }
            | ResponsePayload::Delta { summary, .. }
            | ResponsePayload::OverlayOpened { summary, .. }
            | ResponsePayload::OverlayClosed { summary, .. } => summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeltaContext {
    Base,
    Overlay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCounts {
    pub invalidated: usize,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

/// One node the agent has not seen before (or an overlay content node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    #[serde(rename = "ref")]
    pub node_ref: String,
    pub kind: String,
    pub label: String,
    /// Names of the state flags that are set, e.g. `["visible", "enabled"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedSummary {
    #[serde(rename = "ref")]
    pub node_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub change_type: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeType {
    Text,
    State,
    Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayInfo {
    pub overlay_type: OverlayKind,
    pub root_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverlayKind {
    Modal,
    Dialog,
    Dropdown,
    Tooltip,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverlayTransition {
    Opened,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousOverlay {
    pub overlay_type: OverlayKind,
    pub root_ref: String,
    pub invalidated_refs: Vec<String>,
}

/// Base-layer drift accumulated while an overlay was open, delivered inside
/// the single `overlay_closed` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseChanges {
    pub counts: DeltaCounts,
    pub added: Vec<NodeSummary>,
    pub modified: Vec<ModifiedSummary>,
    pub removed_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub name: String,
    pub status: ActionStatus,
}

/// Envelope returned for every executed (or refused) action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDeltaPayload {
    pub action: ActionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_action: Option<ResponsePayload>,
    pub result: ResponsePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
