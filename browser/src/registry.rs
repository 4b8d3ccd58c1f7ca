//! Per-page session bundle and the process-wide registry that owns one
//! bundle per live page. Entries appear on first use and are removed
//! explicitly when the page closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::Result;
use crate::cdp::SharedCdpClient;
use crate::config::SnapshotConfig;
use crate::frames::FrameTracker;
use crate::idle::NetworkIdleTracker;
use crate::snapshotter::Snapshotter;
use crate::stabilize::DomStabilizer;
use crate::state::PageSnapshotState;
use crate::watcher::NetworkWatcher;

/// Everything the engine keeps for one page. All cross-component state for
/// a page hangs off this bundle, so dropping it drops the page's state.
pub struct PageSession {
    pub page_id: String,
    pub client: SharedCdpClient,
    pub config: SnapshotConfig,
    pub frames: Arc<FrameTracker>,
    pub state: Mutex<PageSnapshotState>,
    pub snapshotter: Snapshotter,
    pub stabilizer: DomStabilizer,
    idle: OnceCell<Arc<NetworkIdleTracker>>,
    pub watcher: Mutex<Option<Arc<NetworkWatcher>>>,
    /// Serializes `ActionExecutor::execute` per page; later calls queue
    /// behind the in-flight one.
    pub action_lock: Mutex<()>,
}

impl PageSession {
    pub fn new(page_id: String, client: SharedCdpClient, config: SnapshotConfig) -> Arc<Self> {
        let frames = Arc::new(FrameTracker::new(Arc::clone(&client), &config));
        let snapshotter = Snapshotter::new(
            Arc::clone(&client),
            Arc::clone(&frames),
            page_id.clone(),
        );
        let stabilizer = DomStabilizer::new(Arc::clone(&client), &config.waits);
        Arc::new(Self {
            page_id,
            config: config.clone(),
            frames,
            state: Mutex::new(PageSnapshotState::new(config)),
            snapshotter,
            stabilizer,
            idle: OnceCell::new(),
            watcher: Mutex::new(None),
            action_lock: Mutex::new(()),
            client,
        })
    }

    /// Lazily attach the network-idle tracker; shared across callers.
    pub async fn idle(&self) -> Result<Arc<NetworkIdleTracker>> {
        self.idle
            .get_or_try_init(|| NetworkIdleTracker::attach(&self.client))
            .await
            .cloned()
    }

    /// Attach (or replace) the agent-visible network watcher for this page.
    pub async fn attach_watcher(&self, resource_types: &[&str]) -> Result<Arc<NetworkWatcher>> {
        let watcher = NetworkWatcher::attach(
            Arc::clone(&self.client),
            resource_types,
            self.config.max_body_size,
        )
        .await?;
        *self.watcher.lock().await = Some(Arc::clone(&watcher));
        Ok(watcher)
    }
}

static SESSIONS: Lazy<RwLock<HashMap<String, Arc<PageSession>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Session for `page_id`, created on first use.
pub fn session_for(
    page_id: &str,
    client: SharedCdpClient,
    config: SnapshotConfig,
) -> Arc<PageSession> {
    if let Ok(sessions) = SESSIONS.read() {
        if let Some(existing) = sessions.get(page_id) {
            return Arc::clone(existing);
        }
    }
    let session = PageSession::new(page_id.to_string(), client, config);
    if let Ok(mut sessions) = SESSIONS.write() {
        // A racing creator may have won; keep the first one registered.
        return Arc::clone(
            sessions
                .entry(page_id.to_string())
                .or_insert_with(|| Arc::clone(&session)),
        );
    }
    session
}

/// Drop all engine state for a closed page.
pub fn remove_page(page_id: &str) {
    if let Ok(mut sessions) = SESSIONS.write() {
        if sessions.remove(page_id).is_some() {
            debug!(page = page_id, "Page session removed");
        }
    }
}
