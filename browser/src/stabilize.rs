//! DOM stabilization: install a mutation counter in the page, then wait for
//! it to stop moving before a snapshot is taken.

use serde_json::Value;
use serde_json::json;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::cdp::SharedCdpClient;
use crate::config::WaitConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Counter installed once per document; re-evaluating returns the running
/// mutation count.
const MUTATION_COUNTER_JS: &str = r#"(() => {
    if (!window.__pd_mutations) {
        window.__pd_mutations = { count: 0 };
        try {
            new MutationObserver((records) => {
                window.__pd_mutations.count += records.length;
            }).observe(document.documentElement, {
                subtree: true,
                childList: true,
                attributes: true,
                characterData: true
            });
        } catch (e) {}
    }
    return window.__pd_mutations.count;
})()"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizeStatus {
    Stable,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub struct StabilizeOutcome {
    pub status: StabilizeStatus,
    pub wait_time_ms: u64,
    pub mutation_count: Option<u64>,
    pub warning: Option<String>,
}

pub struct DomStabilizer {
    client: SharedCdpClient,
    quiet_window: Duration,
    timeout: Duration,
}

impl DomStabilizer {
    pub fn new(client: SharedCdpClient, waits: &WaitConfig) -> Self {
        Self {
            client,
            quiet_window: Duration::from_millis(waits.dom_quiet_window_ms),
            timeout: Duration::from_millis(waits.dom_timeout_ms),
        }
    }

    /// Wait until the mutation count holds still for the quiet window.
    /// Never raises; timeouts and evaluation failures come back as status
    /// plus a warning.
    pub async fn stabilize(&self) -> StabilizeOutcome {
        let started = Instant::now();

        let mut last_count = match self.read_mutation_count().await {
            Ok(count) => count,
            Err(message) => {
                return StabilizeOutcome {
                    status: StabilizeStatus::Error,
                    wait_time_ms: started.elapsed().as_millis() as u64,
                    mutation_count: None,
                    warning: Some(format!("DOM stabilization unavailable: {message}")),
                };
            }
        };
        let mut quiet_since = Instant::now();

        loop {
            if quiet_since.elapsed() >= self.quiet_window {
                debug!(
                    mutations = last_count,
                    wait_ms = started.elapsed().as_millis() as u64,
                    "DOM stable"
                );
                return StabilizeOutcome {
                    status: StabilizeStatus::Stable,
                    wait_time_ms: started.elapsed().as_millis() as u64,
                    mutation_count: Some(last_count),
                    warning: None,
                };
            }
            if started.elapsed() >= self.timeout {
                return StabilizeOutcome {
                    status: StabilizeStatus::Timeout,
                    wait_time_ms: started.elapsed().as_millis() as u64,
                    mutation_count: Some(last_count),
                    warning: Some("DOM did not settle within the stabilization budget".to_string()),
                };
            }

            tokio::time::sleep(POLL_INTERVAL).await;

            match self.read_mutation_count().await {
                Ok(count) => {
                    if count != last_count {
                        last_count = count;
                        quiet_since = Instant::now();
                    }
                }
                Err(message) => {
                    return StabilizeOutcome {
                        status: StabilizeStatus::Error,
                        wait_time_ms: started.elapsed().as_millis() as u64,
                        mutation_count: Some(last_count),
                        warning: Some(format!("DOM stabilization aborted: {message}")),
                    };
                }
            }
        }
    }

    async fn read_mutation_count(&self) -> std::result::Result<u64, String> {
        let response = self
            .client
            .send(
                "Runtime.evaluate",
                json!({ "expression": MUTATION_COUNTER_JS, "returnByValue": true }),
            )
            .await
            .map_err(|err| err.to_string())?;
        Ok(response
            .get("result")
            .and_then(|result| result.get("value"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}
