//! Renders state-machine decisions into the wire payload union. The
//! formatter owns the "drain invalidations last" rule: frame events that
//! raced the capture still land in the payload being produced.

use pagedelta_protocol::BaseChanges;
use pagedelta_protocol::DeltaCounts;
use pagedelta_protocol::ModifiedSummary;
use pagedelta_protocol::NodeSummary;
use pagedelta_protocol::OverlayInfo;
use pagedelta_protocol::OverlayTransition;
use pagedelta_protocol::PreviousOverlay;
use pagedelta_protocol::ResponsePayload;

use crate::frames::FrameTracker;
use crate::model::BaseSnapshot;
use crate::model::Delta;
use crate::model::ModifiedNode;
use crate::model::ReadableNode;
use crate::model::Region;
use crate::model::ScopedElementRef;
use crate::state::SnapshotDecision;
use crate::version::VersionedSnapshot;

pub struct DeltaFormatter;

impl DeltaFormatter {
    /// Turn a decision into its payload. Frame invalidations are drained
    /// here, after the final capture, and precede added/modified content.
    pub fn render(decision: SnapshotDecision, frames: &FrameTracker) -> ResponsePayload {
        let frame_invalidations = frames.drain_invalidations();

        match decision {
            SnapshotDecision::Full { current, reason } => full_payload(&current, Some(reason), frames),
            SnapshotDecision::NoChange => ResponsePayload::NoChange {
                summary: "No changes detected.".to_string(),
            },
            SnapshotDecision::Delta {
                context,
                delta,
                current: _,
            } => {
                let invalidated_refs = merge_refs(
                    frames,
                    &frame_invalidations,
                    &delta.removed,
                );
                let removed_refs = serialize_all(frames, &delta.removed);
                let added = node_summaries(frames, &delta.added);
                let modified = modified_summaries(frames, &delta.modified);
                let counts = DeltaCounts {
                    invalidated: invalidated_refs.len(),
                    added: added.len(),
                    modified: modified.len(),
                    removed: removed_refs.len(),
                };
                let summary = format!(
                    "{}: +{} ~{} -{}, invalidated {}.",
                    context_name(context),
                    counts.added,
                    counts.modified,
                    counts.removed,
                    counts.invalidated
                );
                ResponsePayload::Delta {
                    summary,
                    context,
                    counts,
                    invalidated_refs,
                    added,
                    modified,
                    removed_refs,
                }
            }
            SnapshotDecision::OverlayOpened {
                overlay,
                transition,
                previous,
                current: _,
            } => {
                let mut invalidated_refs = serialize_all(frames, &frame_invalidations);
                let previous_overlay = previous.map(|prior| {
                    let prior_refs = serialize_all(frames, &prior.captured_refs);
                    for serialized in &prior_refs {
                        push_unique(&mut invalidated_refs, serialized.clone());
                    }
                    PreviousOverlay {
                        overlay_type: prior.overlay_type,
                        root_ref: frames.serialize_ref(&prior.root_ref),
                        invalidated_refs: prior_refs,
                    }
                });
                let nodes = node_summaries(frames, &overlay.nodes);
                let counts = DeltaCounts {
                    invalidated: invalidated_refs.len(),
                    added: nodes.len(),
                    modified: 0,
                    removed: 0,
                };
                let summary = match transition {
                    OverlayTransition::Opened => format!(
                        "Overlay opened ({}): {} nodes.",
                        overlay.overlay_type,
                        nodes.len()
                    ),
                    OverlayTransition::Replaced => format!(
                        "Overlay replaced ({}): {} nodes.",
                        overlay.overlay_type,
                        nodes.len()
                    ),
                };
                ResponsePayload::OverlayOpened {
                    summary,
                    invalidated_refs,
                    counts,
                    overlay: OverlayInfo {
                        overlay_type: overlay.overlay_type,
                        root_ref: frames.serialize_ref(&overlay.root_ref),
                    },
                    nodes,
                    transition: Some(transition),
                    previous_overlay,
                }
            }
            SnapshotDecision::OverlayClosed {
                overlay,
                base_delta,
                current: _,
            } => {
                let mut invalidated_refs = serialize_all(frames, &overlay.captured_refs);
                for node_ref in &frame_invalidations {
                    push_unique(&mut invalidated_refs, frames.serialize_ref(node_ref));
                }

                let base_changes = base_delta.map(|delta| {
                    let removed_refs = serialize_all(frames, &delta.removed);
                    let added = node_summaries(frames, &delta.added);
                    let modified = modified_summaries(frames, &delta.modified);
                    BaseChanges {
                        counts: DeltaCounts {
                            invalidated: removed_refs.len(),
                            added: added.len(),
                            modified: modified.len(),
                            removed: removed_refs.len(),
                        },
                        added,
                        modified,
                        removed_refs,
                    }
                });

                let summary = match &base_changes {
                    Some(changes) => format!(
                        "Overlay closed ({}); base: +{} ~{} -{}, invalidated {}.",
                        overlay.overlay_type,
                        changes.counts.added,
                        changes.counts.modified,
                        changes.counts.removed,
                        invalidated_refs.len()
                    ),
                    None => format!(
                        "Overlay closed ({}), invalidated {}.",
                        overlay.overlay_type,
                        invalidated_refs.len()
                    ),
                };

                ResponsePayload::OverlayClosed {
                    summary,
                    overlay: OverlayInfo {
                        overlay_type: overlay.overlay_type,
                        root_ref: frames.serialize_ref(&overlay.root_ref),
                    },
                    invalidated_refs,
                    base_changes,
                }
            }
        }
    }
}

/// Delta payload for the "Before action:" block. Does not drain frame
/// invalidations; those belong to the action's result payload.
pub fn render_pre_action(delta: &Delta, frames: &FrameTracker) -> ResponsePayload {
    let removed_refs = serialize_all(frames, &delta.removed);
    let added = node_summaries(frames, &delta.added);
    let modified = modified_summaries(frames, &delta.modified);
    let counts = DeltaCounts {
        invalidated: removed_refs.len(),
        added: added.len(),
        modified: modified.len(),
        removed: removed_refs.len(),
    };
    let summary = format!(
        "Before action: Base: +{} ~{} -{}, invalidated {}.",
        counts.added, counts.modified, counts.removed, counts.invalidated
    );
    ResponsePayload::Delta {
        summary,
        context: pagedelta_protocol::DeltaContext::Base,
        counts,
        invalidated_refs: removed_refs.clone(),
        added,
        modified,
        removed_refs,
    }
}

fn context_name(context: pagedelta_protocol::DeltaContext) -> &'static str {
    match context {
        pagedelta_protocol::DeltaContext::Base => "Base",
        pagedelta_protocol::DeltaContext::Overlay => "Overlay",
    }
}

fn full_payload(
    current: &VersionedSnapshot,
    reason: Option<String>,
    frames: &FrameTracker,
) -> ResponsePayload {
    let snapshot = &current.snapshot;
    let mut summary = format!(
        "Full snapshot v{} ({} nodes, {} interactive).",
        current.version, snapshot.meta.node_count, snapshot.meta.interactive_count
    );
    if let Some(reason) = reason.as_deref() {
        summary.push_str(&format!(" Reason: {reason}."));
    }
    ResponsePayload::Full {
        summary,
        snapshot: render_snapshot_text(snapshot, frames),
        reason,
    }
}

/// Compact text view of a snapshot, region-grouped, one line per node.
pub fn render_snapshot_text(snapshot: &BaseSnapshot, frames: &FrameTracker) -> String {
    const REGION_ORDER: [Region; 9] = [
        Region::Header,
        Region::Nav,
        Region::Main,
        Region::Form,
        Region::Dialog,
        Region::Search,
        Region::Aside,
        Region::Footer,
        Region::Unknown,
    ];

    let mut lines = vec![format!("Page: {} ({})", snapshot.title, snapshot.url)];
    for warning in &snapshot.meta.warnings {
        lines.push(format!("warning: {warning}"));
    }
    for region in REGION_ORDER {
        let members: Vec<&ReadableNode> = snapshot
            .nodes
            .iter()
            .filter(|node| node.placement.region == region)
            .collect();
        if members.is_empty() {
            continue;
        }
        lines.push(format!("[{region}]"));
        for node in members {
            lines.push(render_node_line(node, frames));
        }
    }
    lines.join("\n")
}

fn render_node_line(node: &ReadableNode, frames: &FrameTracker) -> String {
    let serialized = frames.serialize_ref(&node.scoped_ref());
    let mut line = format!("- [{serialized}] {} \"{}\"", node.kind, node.label);
    let flags = node.state.active_flags();
    if !flags.is_empty() {
        line.push_str(&format!(" ({})", flags.join(", ")));
    }
    line.push_str(&format!(" {{{}}}", node.find.primary));
    line
}

fn node_summaries(frames: &FrameTracker, nodes: &[ReadableNode]) -> Vec<NodeSummary> {
    nodes
        .iter()
        .map(|node| {
            let flags = node.state.active_flags();
            NodeSummary {
                node_ref: frames.serialize_ref(&node.scoped_ref()),
                kind: node.kind.to_string(),
                label: node.label.clone(),
                state: (!flags.is_empty()).then_some(flags),
            }
        })
        .collect()
}

fn modified_summaries(frames: &FrameTracker, modified: &[ModifiedNode]) -> Vec<ModifiedSummary> {
    modified
        .iter()
        .map(|entry| {
            let labels_changed = entry.previous_label != entry.current_label;
            ModifiedSummary {
                node_ref: frames.serialize_ref(&entry.node_ref),
                kind: Some(entry.kind.to_string()),
                change_type: entry.change_type,
                previous_label: labels_changed.then(|| entry.previous_label.clone()),
                current_label: labels_changed.then(|| entry.current_label.clone()),
            }
        })
        .collect()
}

fn serialize_all(frames: &FrameTracker, refs: &[ScopedElementRef]) -> Vec<String> {
    let mut out = Vec::new();
    for node_ref in refs {
        push_unique(&mut out, frames.serialize_ref(node_ref));
    }
    out
}

/// Union of frame invalidations and removed-node refs, frame events first,
/// first occurrence preserved.
fn merge_refs(
    frames: &FrameTracker,
    frame_invalidations: &[ScopedElementRef],
    removed: &[ScopedElementRef],
) -> Vec<String> {
    let mut out = serialize_all(frames, frame_invalidations);
    for node_ref in removed {
        push_unique(&mut out, frames.serialize_ref(node_ref));
    }
    out
}

fn push_unique(list: &mut Vec<String>, candidate: String) {
    if !list.contains(&candidate) {
        list.push(candidate);
    }
}
