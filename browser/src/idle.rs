//! Per-page network-idle tracking. Counts in-flight requests by generation
//! so that late events from a superseded document can never hold a wait
//! hostage or drive the counter negative.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::cdp::SharedCdpClient;
use crate::cdp::events;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct IdleInner {
    generation: u64,
    inflight: usize,
    /// requestId → generation it was observed in.
    by_request: HashMap<String, u64>,
    /// Bumped on every accepted event so the waiter can detect
    /// start-and-finish bursts between polls.
    activity: u64,
}

pub struct NetworkIdleTracker {
    inner: Arc<Mutex<IdleInner>>,
}

impl NetworkIdleTracker {
    /// Enable the Network domain and subscribe to request lifecycle events.
    pub async fn attach(client: &SharedCdpClient) -> Result<Arc<Self>> {
        client.send("Network.enable", json!({})).await?;

        let tracker = Arc::new(Self {
            inner: Arc::new(Mutex::new(IdleInner::default())),
        });

        let on_request = Arc::clone(&tracker.inner);
        client.on(
            events::REQUEST_WILL_BE_SENT,
            Arc::new(move |params: &Value| {
                // Long-lived sockets would never settle; they do not count.
                if params.get("type").and_then(Value::as_str) == Some("WebSocket") {
                    return;
                }
                let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
                    return;
                };
                let mut inner = lock(&on_request);
                let generation = inner.generation;
                inner.by_request.insert(request_id.to_string(), generation);
                inner.inflight += 1;
                inner.activity += 1;
            }),
        );

        for event in [events::LOADING_FINISHED, events::LOADING_FAILED] {
            let on_settled = Arc::clone(&tracker.inner);
            client.on(
                event,
                Arc::new(move |params: &Value| {
                    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
                        return;
                    };
                    let mut inner = lock(&on_settled);
                    let Some(generation) = inner.by_request.remove(request_id) else {
                        return;
                    };
                    // Stragglers from before a navigation are discarded.
                    if generation == inner.generation {
                        inner.inflight = inner.inflight.saturating_sub(1);
                        inner.activity += 1;
                    }
                }),
            );
        }

        Ok(tracker)
    }

    /// Start a new generation; in-flight requests of the old document no
    /// longer count toward idleness.
    pub fn mark_navigation(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.inflight = 0;
        inner.activity += 1;
        debug!(generation = inner.generation, "Network idle generation advanced");
    }

    pub fn inflight(&self) -> usize {
        lock(&self.inner).inflight
    }

    /// Resolves `true` once the in-flight count has been continuously zero
    /// for `quiet_window_ms`; `false` when `timeout_ms` elapses first.
    /// Never raises.
    pub async fn wait_for_quiet(&self, timeout_ms: u64, quiet_window_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let quiet_window = Duration::from_millis(quiet_window_ms);
        let mut quiet_since: Option<(Instant, u64)> = None;

        loop {
            let (inflight, activity) = {
                let inner = lock(&self.inner);
                (inner.inflight, inner.activity)
            };

            if inflight == 0 {
                match quiet_since {
                    Some((started, seen_activity)) if seen_activity == activity => {
                        if started.elapsed() >= quiet_window {
                            return true;
                        }
                    }
                    _ => quiet_since = Some((Instant::now(), activity)),
                }
            } else {
                quiet_since = None;
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn lock(inner: &Arc<Mutex<IdleInner>>) -> std::sync::MutexGuard<'_, IdleInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
