//! Frame and loader identity tracking. Issues scoped element refs and turns
//! cross-document navigations into invalidation notices for exactly the
//! refs that were handed out against the superseded document.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::cdp::SharedCdpClient;
use crate::cdp::events;
use crate::config::SnapshotConfig;
use crate::model::FrameState;
use crate::model::ScopedElementRef;

#[derive(Default)]
struct FrameInner {
    frames: HashMap<String, FrameState>,
    main_frame_id: Option<String>,
    /// Refs handed out, keyed by (frame, loader).
    issued: HashMap<(String, String), HashSet<u64>>,
    /// Insertion order across all frames, for eviction.
    issued_order: VecDeque<ScopedElementRef>,
    invalidations: Vec<ScopedElementRef>,
    max_issued_refs: usize,
    eviction_batch_size: usize,
}

pub struct FrameTracker {
    client: SharedCdpClient,
    inner: Arc<Mutex<FrameInner>>,
    init: OnceCell<()>,
}

impl FrameTracker {
    pub fn new(client: SharedCdpClient, config: &SnapshotConfig) -> Self {
        let inner = FrameInner {
            max_issued_refs: config.max_issued_refs,
            eviction_batch_size: config.eviction_batch_size,
            ..Default::default()
        };
        Self {
            client,
            inner: Arc::new(Mutex::new(inner)),
            init: OnceCell::new(),
        }
    }

    /// Enable the Page domain, seed the frame tree, and subscribe to frame
    /// lifecycle events. Concurrent and repeated calls share one init.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.client.send("Page.enable", json!({})).await?;
                let tree = self.client.send("Page.getFrameTree", json!({})).await?;
                {
                    let mut inner = lock(&self.inner);
                    if let Some(frame_tree) = tree.get("frameTree") {
                        seed_frame_tree(&mut inner, frame_tree, true);
                    }
                }

                let on_navigated = Arc::clone(&self.inner);
                self.client.on(
                    events::FRAME_NAVIGATED,
                    Arc::new(move |params: &Value| {
                        if let Some(frame) = params.get("frame") {
                            handle_frame_navigated(&on_navigated, frame);
                        }
                    }),
                );

                let on_detached = Arc::clone(&self.inner);
                self.client.on(
                    events::FRAME_DETACHED,
                    Arc::new(move |params: &Value| {
                        if let Some(frame_id) = params.get("frameId").and_then(Value::as_str) {
                            handle_frame_detached(&on_detached, frame_id);
                        }
                    }),
                );

                Ok(())
            })
            .await
            .copied()
    }

    pub fn create_ref(&self, backend_node_id: u64, frame_id: &str) -> Option<ScopedElementRef> {
        let mut inner = lock(&self.inner);
        let loader_id = inner.frames.get(frame_id)?.loader_id.clone();
        let node_ref = ScopedElementRef {
            backend_node_id,
            frame_id: frame_id.to_string(),
            loader_id: loader_id.clone(),
        };

        let newly_issued = inner
            .issued
            .entry((frame_id.to_string(), loader_id))
            .or_default()
            .insert(backend_node_id);
        if newly_issued {
            inner.issued_order.push_back(node_ref.clone());
            evict_if_needed(&mut inner);
        }
        Some(node_ref)
    }

    pub fn is_valid(&self, node_ref: &ScopedElementRef) -> bool {
        let inner = lock(&self.inner);
        inner
            .frames
            .get(&node_ref.frame_id)
            .is_some_and(|frame| frame.loader_id == node_ref.loader_id)
    }

    /// `loader:backend` for main-frame refs, `frame:loader:backend` for
    /// iframe refs.
    pub fn serialize_ref(&self, node_ref: &ScopedElementRef) -> String {
        let inner = lock(&self.inner);
        serialize_with_main(node_ref, inner.main_frame_id.as_deref())
    }

    /// None when the frame is gone or the serialized loader no longer
    /// matches the frame's current document.
    pub fn parse_ref(&self, serialized: &str) -> Option<ScopedElementRef> {
        let inner = lock(&self.inner);
        let parts: Vec<&str> = serialized.split(':').collect();
        let (frame_id, loader_id, backend) = match parts.as_slice() {
            [loader, backend] => (inner.main_frame_id.clone()?, (*loader).to_string(), backend),
            [frame, loader, backend] => {
                ((*frame).to_string(), (*loader).to_string(), backend)
            }
            _ => return None,
        };
        let backend_node_id = backend.parse::<u64>().ok()?;
        let current = inner.frames.get(&frame_id)?;
        if current.loader_id != loader_id {
            return None;
        }
        Some(ScopedElementRef {
            backend_node_id,
            frame_id,
            loader_id,
        })
    }

    /// Pop every invalidation accumulated since the last drain.
    pub fn drain_invalidations(&self) -> Vec<ScopedElementRef> {
        std::mem::take(&mut lock(&self.inner).invalidations)
    }

    pub fn prune_refs(&self, refs: &[ScopedElementRef]) {
        let mut inner = lock(&self.inner);
        for node_ref in refs {
            let key = (node_ref.frame_id.clone(), node_ref.loader_id.clone());
            if let Some(set) = inner.issued.get_mut(&key) {
                set.remove(&node_ref.backend_node_id);
            }
        }
        inner
            .issued_order
            .retain(|queued| !refs.contains(queued));
    }

    pub fn clear_all_refs(&self) {
        let mut inner = lock(&self.inner);
        inner.issued.clear();
        inner.issued_order.clear();
    }

    pub fn frames_snapshot(&self) -> Vec<FrameState> {
        lock(&self.inner).frames.values().cloned().collect()
    }

    pub fn main_frame(&self) -> Option<FrameState> {
        let inner = lock(&self.inner);
        let main_id = inner.main_frame_id.as_ref()?;
        inner.frames.get(main_id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn issued_count(&self) -> usize {
        lock(&self.inner).issued_order.len()
    }
}

fn lock(inner: &Arc<Mutex<FrameInner>>) -> std::sync::MutexGuard<'_, FrameInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn serialize_with_main(node_ref: &ScopedElementRef, main_frame_id: Option<&str>) -> String {
    if main_frame_id == Some(node_ref.frame_id.as_str()) {
        format!("{}:{}", node_ref.loader_id, node_ref.backend_node_id)
    } else {
        format!(
            "{}:{}:{}",
            node_ref.frame_id, node_ref.loader_id, node_ref.backend_node_id
        )
    }
}

fn seed_frame_tree(inner: &mut FrameInner, frame_tree: &Value, is_root: bool) {
    if let Some(frame) = frame_tree.get("frame") {
        let id = frame.get("id").and_then(Value::as_str).unwrap_or_default();
        let state = FrameState {
            frame_id: id.to_string(),
            loader_id: frame
                .get("loaderId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            url: frame
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_main: is_root,
        };
        if is_root {
            inner.main_frame_id = Some(id.to_string());
        }
        inner.frames.insert(id.to_string(), state);
    }
    if let Some(children) = frame_tree.get("childFrames").and_then(Value::as_array) {
        for child in children {
            seed_frame_tree(inner, child, false);
        }
    }
}

fn handle_frame_navigated(inner: &Arc<Mutex<FrameInner>>, frame: &Value) {
    let Some(frame_id) = frame.get("id").and_then(Value::as_str) else {
        return;
    };
    let loader_id = frame
        .get("loaderId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let url = frame
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let has_parent = frame.get("parentId").and_then(Value::as_str).is_some();

    let mut inner = lock(inner);
    if inner.main_frame_id.is_none() && !has_parent {
        inner.main_frame_id = Some(frame_id.to_string());
    }
    let is_main = inner.main_frame_id.as_deref() == Some(frame_id);

    match inner.frames.get(frame_id).map(|f| f.loader_id.clone()) {
        Some(previous_loader) if previous_loader == loader_id => {
            // Same-document navigation: identity unchanged.
            if let Some(state) = inner.frames.get_mut(frame_id) {
                state.url = url;
            }
            debug!(frame = frame_id, "Same-document navigation");
        }
        Some(previous_loader) => {
            invalidate_loader(&mut inner, frame_id, &previous_loader);
            inner.frames.insert(
                frame_id.to_string(),
                FrameState {
                    frame_id: frame_id.to_string(),
                    loader_id: loader_id.clone(),
                    url,
                    is_main,
                },
            );
            debug!(
                frame = frame_id,
                previous_loader, loader = loader_id, "Cross-document navigation"
            );
        }
        None => {
            inner.frames.insert(
                frame_id.to_string(),
                FrameState {
                    frame_id: frame_id.to_string(),
                    loader_id,
                    url,
                    is_main,
                },
            );
        }
    }
}

fn handle_frame_detached(inner: &Arc<Mutex<FrameInner>>, frame_id: &str) {
    let mut inner = lock(inner);
    let loaders: Vec<String> = inner
        .issued
        .keys()
        .filter(|(frame, _)| frame == frame_id)
        .map(|(_, loader)| loader.clone())
        .collect();
    for loader in loaders {
        invalidate_loader(&mut inner, frame_id, &loader);
    }
    inner.frames.remove(frame_id);
    debug!(frame = frame_id, "Frame detached");
}

/// Move every issued ref of (frame, loader) into the invalidation queue.
fn invalidate_loader(inner: &mut FrameInner, frame_id: &str, loader_id: &str) {
    let key = (frame_id.to_string(), loader_id.to_string());
    let Some(backend_ids) = inner.issued.remove(&key) else {
        return;
    };
    inner.issued_order.retain(|queued| {
        !(queued.frame_id == frame_id && queued.loader_id == loader_id)
    });
    for backend_node_id in backend_ids {
        inner.invalidations.push(ScopedElementRef {
            backend_node_id,
            frame_id: frame_id.to_string(),
            loader_id: loader_id.to_string(),
        });
    }
}

/// Memory cap: silently drop the oldest refs. Evicted refs become
/// unresolvable rather than invalid; no notice is emitted for them.
fn evict_if_needed(inner: &mut FrameInner) {
    if inner.issued_order.len() <= inner.max_issued_refs {
        return;
    }
    let batch = inner.eviction_batch_size.min(inner.issued_order.len());
    warn!(
        tracked = inner.issued_order.len(),
        batch, "Issued-ref cap exceeded; evicting oldest refs"
    );
    for _ in 0..batch {
        let Some(evicted) = inner.issued_order.pop_front() else {
            break;
        };
        let key = (evicted.frame_id, evicted.loader_id);
        if let Some(set) = inner.issued.get_mut(&key) {
            set.remove(&evicted.backend_node_id);
        }
    }
}
