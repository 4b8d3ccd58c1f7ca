//! Per-page snapshot state machine. Tracks base versus overlay mode, owns
//! the version manager, and turns each fresh capture into the decision the
//! formatter renders. While an overlay is open the base baseline is frozen;
//! base drift is delivered together with the overlay-close notification.

use std::sync::Arc;

use pagedelta_protocol::ChangeType;
use pagedelta_protocol::DeltaContext;
use pagedelta_protocol::OverlayTransition;
use tracing::debug;
use tracing::info;

use crate::config::SnapshotConfig;
use crate::model::BaseSnapshot;
use crate::model::Delta;
use crate::model::ModifiedNode;
use crate::model::ReadableNode;
use crate::overlay;
use crate::overlay::OverlayChange;
use crate::overlay::OverlayDetector;
use crate::overlay::OverlayState;
use crate::version::AgentStateValidation;
use crate::version::SnapshotVersionManager;
use crate::version::VersionedSnapshot;

#[derive(Debug, Clone)]
enum PageMode {
    Uninitialized,
    Base,
    Overlay(OverlayState),
}

/// What the latest capture means for the agent; consumed by the formatter.
#[derive(Debug, Clone)]
pub enum SnapshotDecision {
    Full {
        current: Arc<VersionedSnapshot>,
        reason: String,
    },
    NoChange,
    Delta {
        context: DeltaContext,
        delta: Delta,
        current: Arc<VersionedSnapshot>,
    },
    OverlayOpened {
        overlay: OverlayState,
        transition: OverlayTransition,
        previous: Option<OverlayState>,
        current: Arc<VersionedSnapshot>,
    },
    OverlayClosed {
        overlay: OverlayState,
        base_delta: Option<Delta>,
        current: Arc<VersionedSnapshot>,
    },
}

/// Below this many context nodes a delta is always cheaper than a full
/// snapshot, so the reliability guard does not apply.
const MIN_NODES_FOR_DELTA_GUARD: usize = 10;

pub struct PageSnapshotState {
    versions: SnapshotVersionManager,
    detector: OverlayDetector,
    mode: PageMode,
    /// The snapshot the next base delta is computed against. Frozen while
    /// an overlay is open.
    baseline: Option<Arc<VersionedSnapshot>>,
    config: SnapshotConfig,
}

impl PageSnapshotState {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            versions: SnapshotVersionManager::new(&config),
            detector: OverlayDetector::new(),
            mode: PageMode::Uninitialized,
            baseline: None,
            config,
        }
    }

    pub fn current_version(&self) -> Option<u64> {
        self.versions.current().map(|current| current.version)
    }

    pub fn in_overlay_mode(&self) -> bool {
        matches!(self.mode, PageMode::Overlay(_))
    }

    /// Pre-validation capture: install the snapshot if it changed and
    /// return the governing version.
    pub fn ingest_if_changed(&mut self, snapshot: BaseSnapshot) -> (Arc<VersionedSnapshot>, bool) {
        self.versions.ingest_if_changed(snapshot)
    }

    pub fn validate_agent_state(&self, agent_version: Option<u64>) -> AgentStateValidation {
        self.versions.validate_agent_state(agent_version)
    }

    /// Node identity lookup across current and archived snapshots; used for
    /// the stale-element re-lookup.
    pub fn lookup_node(&self, backend_node_id: u64, frame_id: &str) -> Option<ReadableNode> {
        self.versions.lookup_node(backend_node_id, frame_id)
    }

    /// Delta from an archived version to the current one, for the
    /// "Before action:" block. Base context only.
    pub fn delta_from(&self, archived: &VersionedSnapshot) -> Option<Delta> {
        let current = self.versions.current()?;
        Some(compute_delta(
            &archived.snapshot.nodes.iter().collect::<Vec<_>>(),
            &current.snapshot.nodes.iter().collect::<Vec<_>>(),
        ))
    }

    /// Advance the base baseline. Refused in overlay mode: the frozen base
    /// snapshot must survive until the overlay closes.
    pub fn advance_baseline_to(&mut self, versioned: &Arc<VersionedSnapshot>) -> bool {
        if self.in_overlay_mode() {
            return false;
        }
        self.baseline = Some(Arc::clone(versioned));
        true
    }

    /// Reset the baseline to the current capture and drop overlay mode.
    /// Used when the agent is too far behind to be delta-synced; the full
    /// snapshot delivered alongside makes the current capture the new
    /// shared ground truth.
    pub fn rebase_to_current(&mut self) {
        if let Some(current) = self.versions.current() {
            self.baseline = Some(current);
            self.mode = PageMode::Base;
        }
    }

    /// Drive the state machine with a fresh capture.
    pub fn compute_response(
        &mut self,
        snapshot: BaseSnapshot,
        agent_version: Option<u64>,
    ) -> SnapshotDecision {
        if matches!(self.mode, PageMode::Uninitialized) {
            let current = self.versions.force_ingest(snapshot);
            self.baseline = Some(Arc::clone(&current));
            self.mode = PageMode::Base;
            info!(version = current.version, "First snapshot captured");
            return SnapshotDecision::Full {
                current,
                reason: "first capture".to_string(),
            };
        }

        let (current, is_new) = self.versions.ingest_if_changed(snapshot);
        if !is_new {
            // The pre-action capture may already have installed this
            // content while the baseline is still behind; only short-circuit
            // once the baseline has caught up. Overlay mode always falls
            // through so overlay-content drift is compared explicitly.
            let baseline_caught_up = self
                .baseline
                .as_ref()
                .is_none_or(|baseline| baseline.hash == current.hash);
            if baseline_caught_up && !self.in_overlay_mode() {
                return SnapshotDecision::NoChange;
            }
        }

        if let AgentStateValidation::StaleNoHistory =
            self.versions.validate_agent_state(agent_version)
        {
            self.mode = PageMode::Base;
            self.baseline = Some(Arc::clone(&current));
            return SnapshotDecision::Full {
                current,
                reason: "stale agent state".to_string(),
            };
        }

        let open_overlay = match &self.mode {
            PageMode::Overlay(state) => Some(state.clone()),
            _ => None,
        };

        match self.detector.detect(open_overlay.as_ref(), &current.snapshot) {
            OverlayChange::Opened(state) => {
                debug!(root = %state.root_ref.composite_key(), "Entering overlay mode");
                let decision = SnapshotDecision::OverlayOpened {
                    overlay: state.clone(),
                    transition: OverlayTransition::Opened,
                    previous: None,
                    current,
                };
                self.mode = PageMode::Overlay(state);
                decision
            }
            OverlayChange::Replaced { previous, current: next } => {
                let decision = SnapshotDecision::OverlayOpened {
                    overlay: next.clone(),
                    transition: OverlayTransition::Replaced,
                    previous: Some(previous),
                    current,
                };
                self.mode = PageMode::Overlay(next);
                decision
            }
            OverlayChange::Closed(closed) => {
                self.mode = PageMode::Base;
                let base_delta = self.baseline.as_ref().map(|baseline| {
                    compute_delta(
                        &overlay::base_nodes(None, &baseline.snapshot),
                        &overlay::base_nodes(None, &current.snapshot),
                    )
                });
                self.baseline = Some(Arc::clone(&current));
                let base_delta = base_delta.filter(|delta| !delta.is_empty());
                info!(
                    base_changes = base_delta.as_ref().map(Delta::change_count).unwrap_or(0),
                    "Overlay closed"
                );
                SnapshotDecision::OverlayClosed {
                    overlay: closed,
                    base_delta,
                    current,
                }
            }
            OverlayChange::NoOverlayChange => match open_overlay {
                Some(open) => self.overlay_content_delta(open, current),
                None => self.base_delta(current),
            },
        }
    }

    fn overlay_content_delta(
        &mut self,
        open: OverlayState,
        current: Arc<VersionedSnapshot>,
    ) -> SnapshotDecision {
        let previous_nodes: Vec<&ReadableNode> = open.nodes.iter().collect();
        let current_nodes = overlay::overlay_nodes(&open, &current.snapshot);
        let delta = compute_delta(&previous_nodes, &current_nodes);

        if let Some(refreshed) = overlay::refresh_state(&open, &current.snapshot) {
            self.mode = PageMode::Overlay(refreshed);
        }

        if delta.is_empty() {
            return SnapshotDecision::NoChange;
        }
        let overlay_total = match &self.mode {
            PageMode::Overlay(open) => open.nodes.len(),
            _ => 0,
        };
        if self.delta_is_unreliable(&delta, overlay_total) {
            return SnapshotDecision::Full {
                current,
                reason: "unreliable delta".to_string(),
            };
        }
        SnapshotDecision::Delta {
            context: DeltaContext::Overlay,
            delta,
            current,
        }
    }

    fn base_delta(&mut self, current: Arc<VersionedSnapshot>) -> SnapshotDecision {
        let Some(baseline) = self.baseline.clone() else {
            self.baseline = Some(Arc::clone(&current));
            return SnapshotDecision::Full {
                current,
                reason: "no baseline".to_string(),
            };
        };

        let delta = compute_delta(
            &baseline.snapshot.nodes.iter().collect::<Vec<_>>(),
            &current.snapshot.nodes.iter().collect::<Vec<_>>(),
        );
        self.baseline = Some(Arc::clone(&current));

        if delta.is_empty() {
            return SnapshotDecision::NoChange;
        }
        if self.delta_is_unreliable(&delta, current.snapshot.nodes.len()) {
            info!(
                change_ratio = delta.change_ratio,
                confidence = delta.confidence,
                "Delta unreliable; upgrading to full snapshot"
            );
            return SnapshotDecision::Full {
                current,
                reason: "unreliable delta".to_string(),
            };
        }
        SnapshotDecision::Delta {
            context: DeltaContext::Base,
            delta,
            current,
        }
    }

    fn delta_is_unreliable(&self, delta: &Delta, total_nodes: usize) -> bool {
        if total_nodes < MIN_NODES_FOR_DELTA_GUARD {
            return false;
        }
        delta.confidence < self.config.min_delta_confidence
            || delta.change_ratio > self.config.max_change_ratio
    }
}

/// Diff two node lists by composite identity. Label changes win over state
/// changes, which win over attribute changes, so each modified node carries
/// one change type.
pub fn compute_delta(previous: &[&ReadableNode], current: &[&ReadableNode]) -> Delta {
    let mut delta = Delta::default();

    let previous_keys: Vec<_> = previous.iter().map(|node| node.composite_key()).collect();
    let current_keys: Vec<_> = current.iter().map(|node| node.composite_key()).collect();

    for (node, key) in current.iter().zip(current_keys.iter()) {
        if !previous_keys.contains(key) {
            delta.added.push((*node).clone());
        }
    }

    for (node, key) in previous.iter().zip(previous_keys.iter()) {
        let Some(position) = current_keys.iter().position(|candidate| candidate == key) else {
            delta.removed.push(node.scoped_ref());
            continue;
        };
        let counterpart = current[position];
        let change_type = if node.label != counterpart.label {
            Some(ChangeType::Text)
        } else if node.state != counterpart.state {
            Some(ChangeType::State)
        } else if node.attrs != counterpart.attrs {
            Some(ChangeType::Attributes)
        } else {
            None
        };
        if let Some(change_type) = change_type {
            delta.modified.push(ModifiedNode {
                node_ref: counterpart.scoped_ref(),
                kind: counterpart.kind,
                previous_label: node.label.clone(),
                current_label: counterpart.label.clone(),
                change_type,
            });
        }
    }

    let total = current.len().max(1);
    delta.change_ratio = delta.change_count() as f64 / total as f64;
    delta.confidence = (1.0 - 2.0 * delta.change_ratio).max(0.0);
    delta
}
