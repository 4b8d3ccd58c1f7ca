//! `CdpClient` adapter over a live `chromiumoxide` page session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network as cdp_network;
use chromiumoxide::cdp::browser_protocol::page as cdp_page;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use tracing::debug;
use tracing::warn;

use super::CdpClient;
use super::EventHandler;
use super::events;
use crate::BrowserError;
use crate::Result;

/// Raw CDP command carrying an arbitrary method name and JSON params.
#[derive(Debug, Clone)]
struct RawCdpCommand {
    method: String,
    params: serde_json::Value,
}

impl RawCdpCommand {
    fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl serde::Serialize for RawCdpCommand {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Only the params form the command payload; the method travels in
        // the identifier.
        self.params.serialize(serializer)
    }
}

impl chromiumoxide_types::Method for RawCdpCommand {
    fn identifier(&self) -> chromiumoxide_types::MethodId {
        self.method.clone().into()
    }
}

impl chromiumoxide_types::Command for RawCdpCommand {
    type Response = serde_json::Value;
}

type HandlerMap = Arc<Mutex<HashMap<String, Vec<EventHandler>>>>;

/// Adapter that exposes a chromiumoxide page session through the
/// transport-agnostic [`CdpClient`] trait.
pub struct ChromiumoxideClient {
    page: Arc<CdpPage>,
    handlers: HandlerMap,
    active: Arc<AtomicBool>,
}

impl ChromiumoxideClient {
    pub fn new(page: CdpPage) -> Arc<Self> {
        let client = Arc::new(Self {
            page: Arc::new(page),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicBool::new(true)),
        });
        client.spawn_event_pumps();
        client
    }

    fn dispatch(handlers: &HandlerMap, event: &str, params: &serde_json::Value) {
        let targets: Vec<EventHandler> = match handlers.lock() {
            Ok(map) => map.get(event).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for handler in targets {
            handler(params);
        }
    }

    /// One forwarding task per event type; each ends when the page session
    /// drops, which also flips the client inactive.
    fn spawn_event_pumps(self: &Arc<Self>) {
        macro_rules! pump {
            ($event_ty:ty, $name:expr) => {{
                let page = Arc::clone(&self.page);
                let handlers = Arc::clone(&self.handlers);
                let active = Arc::clone(&self.active);
                tokio::spawn(async move {
                    match page.event_listener::<$event_ty>().await {
                        Ok(mut stream) => {
                            while let Some(event) = stream.next().await {
                                match serde_json::to_value(&*event) {
                                    Ok(params) => Self::dispatch(&handlers, $name, &params),
                                    Err(err) => {
                                        warn!(event = $name, error = %err, "Failed to serialize CDP event");
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            warn!(event = $name, error = %err, "Failed to subscribe to CDP event");
                        }
                    }
                    debug!(event = $name, "CDP event stream ended");
                    active.store(false, Ordering::SeqCst);
                });
            }};
        }

        pump!(cdp_page::EventFrameNavigated, events::FRAME_NAVIGATED);
        pump!(cdp_page::EventFrameDetached, events::FRAME_DETACHED);
        pump!(cdp_network::EventRequestWillBeSent, events::REQUEST_WILL_BE_SENT);
        pump!(cdp_network::EventResponseReceived, events::RESPONSE_RECEIVED);
        pump!(cdp_network::EventLoadingFinished, events::LOADING_FINISHED);
        pump!(cdp_network::EventLoadingFailed, events::LOADING_FAILED);
    }
}

#[async_trait]
impl CdpClient for ChromiumoxideClient {
    async fn send(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        if !self.is_active() {
            return Err(BrowserError::NotConnected);
        }
        let cmd = RawCdpCommand::new(method, params);
        let resp = self
            .page
            .execute(cmd)
            .await
            .map_err(|err| BrowserError::CdpError(err.to_string()))?;
        Ok(resp.result)
    }

    fn on(&self, event: &str, handler: EventHandler) {
        if let Ok(mut map) = self.handlers.lock() {
            map.entry(event.to_string()).or_default().push(handler);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
