//! Monotonic snapshot versioning with a bounded history window, plus the
//! content hash that lets identical captures short-circuit.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::config::SnapshotConfig;
use crate::model::BaseSnapshot;
use crate::model::ReadableNode;

#[derive(Debug, Clone, Serialize)]
pub struct VersionedSnapshot {
    pub version: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot: BaseSnapshot,
}

#[derive(Debug, Clone)]
pub enum AgentStateValidation {
    /// Agent is at (or never claimed) the current version.
    Current,
    /// Agent's version is still in history; a delta from it is feasible.
    StaleWithHistory(Arc<VersionedSnapshot>),
    /// Too old; only a full snapshot can resynchronize the agent.
    StaleNoHistory,
}

pub struct SnapshotVersionManager {
    current: Option<Arc<VersionedSnapshot>>,
    history: VecDeque<Arc<VersionedSnapshot>>,
    /// Never reset: versions stay monotone across navigations.
    next_version: u64,
    history_cap: usize,
}

impl SnapshotVersionManager {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            current: None,
            history: VecDeque::new(),
            next_version: 1,
            history_cap: config.history_cap,
        }
    }

    pub fn current(&self) -> Option<Arc<VersionedSnapshot>> {
        self.current.clone()
    }

    /// Install `snapshot` unless its content hash matches the current one.
    /// Returns the governing versioned snapshot and whether it is new.
    pub fn ingest_if_changed(&mut self, snapshot: BaseSnapshot) -> (Arc<VersionedSnapshot>, bool) {
        let hash = content_hash(&snapshot);
        if let Some(current) = &self.current {
            if current.hash == hash {
                return (Arc::clone(current), false);
            }
        }
        (self.install(snapshot, hash), true)
    }

    /// Install unconditionally, even when the content hash is unchanged.
    pub fn force_ingest(&mut self, snapshot: BaseSnapshot) -> Arc<VersionedSnapshot> {
        let hash = content_hash(&snapshot);
        self.install(snapshot, hash)
    }

    fn install(&mut self, snapshot: BaseSnapshot, hash: String) -> Arc<VersionedSnapshot> {
        let version = self.next_version;
        self.next_version += 1;
        let versioned = Arc::new(VersionedSnapshot {
            version,
            hash,
            timestamp: Utc::now(),
            snapshot,
        });
        if let Some(previous) = self.current.replace(Arc::clone(&versioned)) {
            self.history.push_back(previous);
            while self.history.len() > self.history_cap {
                self.history.pop_front();
            }
        }
        debug!(version, "Snapshot version installed");
        versioned
    }

    pub fn get_version(&self, version: u64) -> Option<Arc<VersionedSnapshot>> {
        if let Some(current) = &self.current {
            if current.version == version {
                return Some(Arc::clone(current));
            }
        }
        self.history
            .iter()
            .find(|archived| archived.version == version)
            .cloned()
    }

    pub fn validate_agent_state(&self, agent_version: Option<u64>) -> AgentStateValidation {
        let Some(agent_version) = agent_version else {
            return AgentStateValidation::Current;
        };
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.version == agent_version)
        {
            return AgentStateValidation::Current;
        }
        match self.get_version(agent_version) {
            Some(archived) => AgentStateValidation::StaleWithHistory(archived),
            None => AgentStateValidation::StaleNoHistory,
        }
    }

    /// Clears snapshots but keeps the version counter running.
    pub fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }

    /// Find a node by identity in the current snapshot or, failing that,
    /// the most recent archived one that still has it.
    pub fn lookup_node(&self, backend_node_id: u64, frame_id: &str) -> Option<ReadableNode> {
        self.current
            .iter()
            .chain(self.history.iter().rev())
            .flat_map(|versioned| versioned.snapshot.nodes.iter())
            .find(|node| {
                node.backend_node_id == backend_node_id && node.frame_id == frame_id
            })
            .cloned()
    }
}

/// Hash the identity-bearing fields of every node; two snapshots with equal
/// hashes are treated as the same content.
pub fn content_hash(snapshot: &BaseSnapshot) -> String {
    hash_nodes(&snapshot.nodes)
}

pub fn hash_nodes(nodes: &[ReadableNode]) -> String {
    let mut hasher = Sha256::new();
    for node in nodes {
        let line = format!(
            "{}\x1f{}\x1f{}\x1f{}\x1f{:?}\x1f{:?}\x1f{:?}\x1f{:?}\x1f{:?}\x1f{:?}\n",
            node.backend_node_id,
            node.kind,
            node.label,
            node.visible,
            node.state.enabled,
            node.state.checked,
            node.state.expanded,
            node.state.selected,
            node.state.focused,
            node.attrs.value,
        );
        hasher.update(line.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
