//! Action execution wrapper: pre-validate the agent's view, run the action,
//! let the page settle, capture, and answer with a delta. Failed actions
//! never advance the baseline; stale element refs get one retry against a
//! fresh capture.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;
use tracing::info;
use tracing::warn;

use pagedelta_protocol::ActionDeltaPayload;
use pagedelta_protocol::ActionReport;
use pagedelta_protocol::ActionStatus;
use pagedelta_protocol::ResponsePayload;

use crate::BrowserError;
use crate::Result;
use crate::format;
use crate::format::DeltaFormatter;
use crate::model::NodeKind;
use crate::registry::PageSession;
use crate::state::SnapshotDecision;
use crate::version::AgentStateValidation;
use crate::version::VersionedSnapshot;

const FAILED_SUMMARY: &str = "action failed; references remain valid";
const STALE_SKIP_REASON: &str = "Action skipped due to stale agent state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Click,
    TypeText,
    Hover,
    Select,
    ScrollIntoView,
    Navigate,
    Evaluate,
    Capture,
    Other,
}

impl ActionType {
    pub fn is_element_targeted(self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::TypeText
                | ActionType::Hover
                | ActionType::Select
                | ActionType::ScrollIntoView
        )
    }
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub name: String,
    pub action_type: ActionType,
    pub agent_version: Option<u64>,
}

/// Message shapes CDP produces when a backend node id no longer resolves.
/// Kept in one place so the retry predicate stays exhaustive.
pub fn is_stale_element_error(err: &BrowserError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    const STALE_SHAPES: &[&str] = &[
        "no node found for given backend id",
        "no node with given id found",
        "could not find node with given id",
        "node is detached from document",
        "node has been deleted",
        "scrollintoviewifneeded",
    ];
    STALE_SHAPES.iter().any(|shape| message.contains(shape))
}

struct PreparedAction {
    pre_action: Option<ResponsePayload>,
    pending_advance: Option<Arc<VersionedSnapshot>>,
    pre_snapshot: Arc<VersionedSnapshot>,
}

enum Prepared {
    Proceed(PreparedAction),
    Refuse(Box<ActionDeltaPayload>),
}

pub struct ActionExecutor {
    session: Arc<PageSession>,
}

impl ActionExecutor {
    pub fn new(session: Arc<PageSession>) -> Self {
        Self { session }
    }

    /// Run a page-level action (navigate, evaluate, capture). Calls on the
    /// same page queue behind the in-flight one.
    pub async fn execute<F, Fut>(&self, request: ActionRequest, action_fn: F) -> ActionDeltaPayload
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let _serialized = self.session.action_lock.lock().await;

        let prepared = match self.prepare(&request).await {
            Prepared::Proceed(prepared) => prepared,
            Prepared::Refuse(payload) => return *payload,
        };

        match action_fn().await {
            Ok(()) => {
                self.complete(&request, prepared, None).await
            }
            Err(err) => self.action_failed(&request, prepared.pre_action, &err),
        }
    }

    /// Run an element-targeted action. The closure receives the backend
    /// node id to act on; if the node went stale underneath the agent, the
    /// action is retried once against a node with the same label and kind.
    pub async fn execute_on_element<F>(
        &self,
        request: ActionRequest,
        target_ref: &str,
        action_fn: F,
    ) -> ActionDeltaPayload
    where
        F: Fn(u64) -> BoxFuture<'static, Result<()>> + Send + Sync,
    {
        let _serialized = self.session.action_lock.lock().await;

        let Some(target) = self.session.frames.parse_ref(target_ref) else {
            return ActionDeltaPayload {
                action: ActionReport {
                    name: request.name.clone(),
                    status: ActionStatus::Failed,
                },
                pre_action: None,
                result: ResponsePayload::NoChange {
                    summary: FAILED_SUMMARY.to_string(),
                },
                warnings: None,
                error: Some(format!(
                    "element reference {target_ref} is stale or unknown"
                )),
            };
        };

        let prepared = match self.prepare(&request).await {
            Prepared::Proceed(prepared) => prepared,
            Prepared::Refuse(payload) => return *payload,
        };

        // Remember the target's identity for re-lookup after a stale miss.
        // The pre-capture may already reflect a re-rendered DOM, so fall
        // back to version history for nodes the agent knew.
        let identity: Option<(String, NodeKind)> = match prepared
            .pre_snapshot
            .snapshot
            .nodes
            .iter()
            .find(|node| {
                node.backend_node_id == target.backend_node_id
                    && node.frame_id == target.frame_id
            }) {
            Some(node) => Some((node.label.clone(), node.kind)),
            None => self
                .session
                .state
                .lock()
                .await
                .lookup_node(target.backend_node_id, &target.frame_id)
                .map(|node| (node.label.clone(), node.kind)),
        };

        match action_fn(target.backend_node_id).await {
            Ok(()) => self.complete(&request, prepared, None).await,
            Err(err) if request.action_type.is_element_targeted()
                && is_stale_element_error(&err) =>
            {
                let Some((label, kind)) = identity else {
                    return self.action_failed(&request, prepared.pre_action, &err);
                };
                info!(
                    action = %request.name,
                    error = %err,
                    "Element went stale; retrying with a fresh reference"
                );
                match self.relocate_element(&label, kind).await {
                    Some(fresh_backend_id) => match action_fn(fresh_backend_id).await {
                        Ok(()) => {
                            self.complete(
                                &request,
                                prepared,
                                Some(
                                    "element was stale; automatically retried with fresh reference"
                                        .to_string(),
                                ),
                            )
                            .await
                        }
                        Err(retry_err) => {
                            self.action_failed(&request, prepared.pre_action, &retry_err)
                        }
                    },
                    None => self.action_failed(&request, prepared.pre_action, &err),
                }
            }
            Err(err) => self.action_failed(&request, prepared.pre_action, &err),
        }
    }

    /// Pre-validation: capture, version the capture, and compare against
    /// the agent's claimed version. A hopelessly stale agent gets a full
    /// snapshot instead of an action.
    async fn prepare(&self, request: &ActionRequest) -> Prepared {
        if let Err(err) = self.session.frames.initialize().await {
            return Prepared::Refuse(Box::new(self.action_failed_payload(request, None, &err)));
        }
        let snapshot = match self.session.snapshotter.capture().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return Prepared::Refuse(Box::new(self.action_failed_payload(request, None, &err)));
            }
        };

        let mut state = self.session.state.lock().await;
        let (current, _is_new) = state.ingest_if_changed(snapshot);

        match state.validate_agent_state(request.agent_version) {
            AgentStateValidation::StaleNoHistory => {
                warn!(
                    action = %request.name,
                    agent_version = ?request.agent_version,
                    current = current.version,
                    "Agent state too old; refusing action"
                );
                state.rebase_to_current();
                drop(state);
                let result = DeltaFormatter::render(
                    SnapshotDecision::Full {
                        current,
                        reason: STALE_SKIP_REASON.to_string(),
                    },
                    &self.session.frames,
                );
                Prepared::Refuse(Box::new(ActionDeltaPayload {
                    action: ActionReport {
                        name: request.name.clone(),
                        status: ActionStatus::Skipped,
                    },
                    pre_action: None,
                    result,
                    warnings: None,
                    error: Some("stale agent state".to_string()),
                }))
            }
            AgentStateValidation::StaleWithHistory(archived) => {
                debug!(
                    agent_version = archived.version,
                    current = current.version,
                    "Agent behind; computing pre-action delta"
                );
                let pre_action = state
                    .delta_from(&archived)
                    .map(|delta| format::render_pre_action(&delta, &self.session.frames));
                Prepared::Proceed(PreparedAction {
                    pre_action,
                    pending_advance: Some(Arc::clone(&current)),
                    pre_snapshot: current,
                })
            }
            AgentStateValidation::Current => Prepared::Proceed(PreparedAction {
                pre_action: None,
                pending_advance: None,
                pre_snapshot: current,
            }),
        }
    }

    /// Post-action: advance pending baseline, stabilize, capture, format.
    async fn complete(
        &self,
        request: &ActionRequest,
        prepared: PreparedAction,
        retry_note: Option<String>,
    ) -> ActionDeltaPayload {
        let mut warnings: Vec<String> = Vec::new();

        if let Some(versioned) = &prepared.pending_advance {
            let mut state = self.session.state.lock().await;
            state.advance_baseline_to(versioned);
        }

        if request.action_type == ActionType::Navigate {
            if let Ok(idle) = self.session.idle().await {
                idle.mark_navigation();
            }
            if let Some(watcher) = self.session.watcher.lock().await.as_ref() {
                watcher.mark_navigation();
            }
        }

        let stabilize = self.session.stabilizer.stabilize().await;
        if let Some(warning) = stabilize.warning {
            warnings.push(warning);
        }

        match self.session.idle().await {
            Ok(idle) => {
                let budget = if request.action_type == ActionType::Navigate {
                    self.session.config.waits.navigation_network_ms
                } else {
                    self.session.config.waits.action_network_ms
                };
                let quiet = idle
                    .wait_for_quiet(budget, self.session.config.waits.network_quiet_window_ms)
                    .await;
                if !quiet {
                    warnings.push("network did not go idle within the wait budget".to_string());
                }
            }
            Err(err) => warnings.push(format!("network idle tracking unavailable: {err}")),
        }

        let result = match self.session.snapshotter.capture().await {
            Ok(snapshot) => {
                let mut state = self.session.state.lock().await;
                let decision = state.compute_response(snapshot, request.agent_version);
                drop(state);
                DeltaFormatter::render(decision, &self.session.frames)
            }
            Err(err) => {
                warnings.push(format!("post-action capture failed: {err}"));
                ResponsePayload::NoChange {
                    summary: "No changes detected.".to_string(),
                }
            }
        };

        ActionDeltaPayload {
            action: ActionReport {
                name: request.name.clone(),
                status: ActionStatus::Completed,
            },
            pre_action: prepared.pre_action,
            result,
            warnings: (!warnings.is_empty()).then_some(warnings),
            error: retry_note,
        }
    }

    /// Fresh capture, then find a node with the same label and kind as the
    /// one that vanished.
    async fn relocate_element(&self, label: &str, kind: NodeKind) -> Option<u64> {
        let snapshot = self.session.snapshotter.capture().await.ok()?;
        let backend_id = snapshot
            .nodes
            .iter()
            .find(|node| node.kind == kind && node.label == label)
            .map(|node| node.backend_node_id);
        let mut state = self.session.state.lock().await;
        state.ingest_if_changed(snapshot);
        backend_id
    }

    fn action_failed(
        &self,
        request: &ActionRequest,
        pre_action: Option<ResponsePayload>,
        err: &BrowserError,
    ) -> ActionDeltaPayload {
        warn!(action = %request.name, error = %err, "Action failed; baseline unchanged");
        self.action_failed_payload(request, pre_action, err)
    }

    fn action_failed_payload(
        &self,
        request: &ActionRequest,
        pre_action: Option<ResponsePayload>,
        err: &BrowserError,
    ) -> ActionDeltaPayload {
        ActionDeltaPayload {
            action: ActionReport {
                name: request.name.clone(),
                status: ActionStatus::Failed,
            },
            pre_action,
            result: ResponsePayload::NoChange {
                summary: FAILED_SUMMARY.to_string(),
            },
            warnings: None,
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::config::WaitConfig;
    use crate::model::BBox;
    use crate::registry::PageSession;
    use crate::testutil::FakeCdpClient;
    use crate::testutil::fixtures;
    use crate::testutil::fixtures::PageFixture;
    use crate::testutil::fixtures::RawSpec;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn test_config() -> SnapshotConfig {
        SnapshotConfig {
            waits: WaitConfig {
                action_network_ms: 50,
                navigation_network_ms: 50,
                network_quiet_window_ms: 10,
                dom_quiet_window_ms: 10,
                dom_timeout_ms: 100,
            },
            ..Default::default()
        }
    }

    fn button_spec(backend_id: u64, name: &'static str) -> RawSpec {
        RawSpec {
            backend_id,
            tag: "button",
            role: "button",
            name,
            bbox: Some(BBox {
                x: 10.0,
                y: 10.0,
                w: 80.0,
                h: 24.0,
            }),
            ..Default::default()
        }
    }

    fn session(client: &Arc<FakeCdpClient>) -> Arc<PageSession> {
        PageSession::new("page-exec".to_string(), client.clone(), test_config())
    }

    fn request(name: &str, action_type: ActionType, agent_version: Option<u64>) -> ActionRequest {
        ActionRequest {
            name: name.to_string(),
            action_type,
            agent_version,
        }
    }

    #[tokio::test]
    async fn successful_action_reports_delta() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "Submit")]));
        let session = session(&client);
        let executor = ActionExecutor::new(session.clone());

        // Seed the baseline with a first capture.
        let first = executor
            .execute(request("capture", ActionType::Capture, None), || async {
                Ok(())
            })
            .await;
        assert_eq!(first.action.status, ActionStatus::Completed);
        assert!(matches!(first.result, ResponsePayload::Full { .. }));

        // The click relabels the button.
        let relabel_client = client.clone();
        let payload = executor
            .execute(request("click", ActionType::Click, None), move || {
                fixtures::install_page(
                    &relabel_client,
                    &PageFixture::new(vec![button_spec(10, "Sending…")]),
                );
                async { Ok(()) }
            })
            .await;

        assert_eq!(payload.action.status, ActionStatus::Completed);
        match payload.result {
            ResponsePayload::Delta {
                counts, modified, ..
            } => {
                assert_eq!(counts.modified, 1);
                assert_eq!(modified[0].previous_label.as_deref(), Some("Submit"));
                assert_eq!(modified[0].current_label.as_deref(), Some("Sending…"));
            }
            other => panic!("expected Delta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_action_keeps_baseline_and_refs() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "Submit")]));
        let session = session(&client);
        let executor = ActionExecutor::new(session.clone());

        executor
            .execute(request("capture", ActionType::Capture, None), || async {
                Ok(())
            })
            .await;
        let version_before = session.state.lock().await.current_version();

        let payload = executor
            .execute(request("click", ActionType::Click, Some(1)), || async {
                Err(BrowserError::ActionFailed("element not clickable".to_string()))
            })
            .await;

        assert_eq!(payload.action.status, ActionStatus::Failed);
        assert_eq!(
            payload.error.as_deref(),
            Some("action failed: element not clickable")
        );
        match payload.result {
            ResponsePayload::NoChange { summary } => {
                assert_eq!(summary, FAILED_SUMMARY);
            }
            other => panic!("expected NoChange, got {other:?}"),
        }
        assert_eq!(
            session.state.lock().await.current_version(),
            version_before
        );
    }

    #[tokio::test]
    async fn stale_agent_version_skips_action() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "v0")]));
        let session = session(&client);
        let executor = ActionExecutor::new(session.clone());

        // March the page through enough versions to evict version 1.
        let labels: [&'static str; 6] = ["v0", "v1", "v2", "v3", "v4", "v5"];
        for label in labels {
            fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, label)]));
            executor
                .execute(request("capture", ActionType::Capture, None), || async {
                    Ok(())
                })
                .await;
        }

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let payload = executor
            .execute(request("click", ActionType::Click, Some(1)), move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 0, "action must not run");
        assert_eq!(payload.action.status, ActionStatus::Skipped);
        assert_eq!(payload.error.as_deref(), Some("stale agent state"));
        match payload.result {
            ResponsePayload::Full { reason, .. } => {
                assert_eq!(reason.as_deref(), Some(STALE_SKIP_REASON));
            }
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_element_retries_once_with_fresh_reference() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "Submit")]));
        let session = session(&client);
        let executor = ActionExecutor::new(session.clone());

        executor
            .execute(request("capture", ActionType::Capture, None), || async {
                Ok(())
            })
            .await;
        let target = format!("{}:10", fixtures::MAIN_LOADER);

        // The DOM re-rendered: same button, new backend id 77.
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(77, "Submit")]));

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let payload = executor
            .execute_on_element(
                request("click", ActionType::Click, None),
                &target,
                move |backend_id| {
                    let attempts = Arc::clone(&attempts_clone);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        if backend_id == 77 {
                            Ok(())
                        } else {
                            Err(BrowserError::CdpError(
                                "No node found for given backend id".to_string(),
                            ))
                        }
                    }
                    .boxed()
                },
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(payload.action.status, ActionStatus::Completed);
        assert_eq!(
            payload.error.as_deref(),
            Some("element was stale; automatically retried with fresh reference")
        );
    }

    #[tokio::test]
    async fn unparseable_target_fails_without_running_action() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "Submit")]));
        let session = session(&client);
        session.frames.initialize().await.expect("initialize");
        let executor = ActionExecutor::new(session);

        let payload = executor
            .execute_on_element(
                request("click", ActionType::Click, None),
                "L-stale:10",
                |_backend_id| async { Ok(()) }.boxed(),
            )
            .await;
        assert_eq!(payload.action.status, ActionStatus::Failed);
        assert!(
            payload
                .error
                .as_deref()
                .is_some_and(|error| error.contains("stale or unknown"))
        );
    }

    #[tokio::test]
    async fn navigation_invalidates_refs_and_advances_version() {
        let client = FakeCdpClient::new();
        fixtures::install_page(&client, &PageFixture::new(vec![button_spec(10, "Submit")]));
        let session = session(&client);
        let executor = ActionExecutor::new(session.clone());

        executor
            .execute(request("capture", ActionType::Capture, None), || async {
                Ok(())
            })
            .await;
        let version_before = session
            .state
            .lock()
            .await
            .current_version()
            .expect("versioned");

        // The navigation closure rotates the loader and serves a new page.
        let nav_client = client.clone();
        let payload = executor
            .execute(request("goto", ActionType::Navigate, None), move || {
                nav_client.emit(
                    crate::cdp::events::FRAME_NAVIGATED,
                    &serde_json::json!({
                        "frame": {
                            "id": fixtures::MAIN_FRAME,
                            "loaderId": "L-2",
                            "url": "https://example.test/next"
                        }
                    }),
                );
                let mut fixture = PageFixture::new(vec![button_spec(20, "Home")]);
                fixture.loader = "L-2".to_string();
                fixtures::install_page(&nav_client, &fixture);
                async { Ok(()) }
            })
            .await;

        assert_eq!(payload.action.status, ActionStatus::Completed);
        match payload.result {
            ResponsePayload::Delta {
                invalidated_refs,
                added,
                ..
            } => {
                // The old main-frame ref appears exactly once.
                assert_eq!(
                    invalidated_refs
                        .iter()
                        .filter(|serialized| serialized.as_str() == "L-1:10")
                        .count(),
                    1
                );
                assert_eq!(added.len(), 1);
                assert!(added[0].node_ref.starts_with("L-2:"));
            }
            other => panic!("expected Delta, got {other:?}"),
        }

        let version_after = session
            .state
            .lock()
            .await
            .current_version()
            .expect("versioned");
        assert!(version_after > version_before);
    }

    #[test]
    fn stale_predicate_covers_known_shapes() {
        for message in [
            "No node found for given backend id",
            "Node is detached from document",
            "Node has been deleted",
            "Could not find node with given id",
            "Protocol error (DOM.scrollIntoViewIfNeeded): node gone",
        ] {
            assert!(
                is_stale_element_error(&BrowserError::CdpError(message.to_string())),
                "should match: {message}"
            );
        }
        assert!(!is_stale_element_error(&BrowserError::CdpError(
            "timeout exceeded".to_string()
        )));
        assert!(!is_stale_element_error(&BrowserError::NotConnected));
    }
}
