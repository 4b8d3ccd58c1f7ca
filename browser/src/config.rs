use serde::Deserialize;

/// Tunables for snapshot capture, waits, and buffers. Defaults match the
/// documented behavior; callers usually construct this once per page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// How many superseded snapshots stay resolvable for delta computation.
    pub history_cap: usize,
    /// Upper bound on element refs tracked across all frames of a page.
    pub max_issued_refs: usize,
    /// How many of the oldest refs are dropped once the cap is exceeded.
    pub eviction_batch_size: usize,
    pub waits: WaitConfig,
    /// Max captured request/response body size in bytes.
    pub max_body_size: usize,
    /// Below this delta confidence the response is upgraded to `full`.
    pub min_delta_confidence: f64,
    /// Above this fraction of changed nodes the delta is considered
    /// unreliable regardless of confidence.
    pub max_change_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Network-quiet budget after an in-page action.
    pub action_network_ms: u64,
    /// Network-quiet budget after a navigation.
    pub navigation_network_ms: u64,
    /// Continuous zero-inflight window that counts as "quiet".
    pub network_quiet_window_ms: u64,
    /// Continuous mutation-free window that counts as "stable".
    pub dom_quiet_window_ms: u64,
    /// Hard budget for DOM stabilization.
    pub dom_timeout_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            history_cap: 3,
            max_issued_refs: 10_000,
            eviction_batch_size: 1_000,
            waits: WaitConfig::default(),
            max_body_size: 10 * 1024,
            min_delta_confidence: 0.6,
            max_change_ratio: 0.4,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            action_network_ms: 3_000,
            navigation_network_ms: 5_000,
            network_quiet_window_ms: 500,
            dom_quiet_window_ms: 100,
            dom_timeout_ms: 2_000,
        }
    }
}
