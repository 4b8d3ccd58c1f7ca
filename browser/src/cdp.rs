use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

pub mod chromiumoxide;

/// CDP event names the engine subscribes to.
pub mod events {
    pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";
    pub const FRAME_DETACHED: &str = "Page.frameDetached";
    pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
    pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
    pub const LOADING_FINISHED: &str = "Network.loadingFinished";
    pub const LOADING_FAILED: &str = "Network.loadingFailed";
}

/// Handlers run synchronously on the event pump; they must only touch cheap
/// locks and never block.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Capability boundary to the DevTools transport. The engine only ever
/// issues raw method calls with JSON params and listens for raw events;
/// request/response correlation and WebSocket framing live behind this trait.
#[async_trait]
pub trait CdpClient: Send + Sync {
    async fn send(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;

    /// Register `handler` for every future occurrence of `event`.
    fn on(&self, event: &str, handler: EventHandler);

    fn is_active(&self) -> bool;
}

pub type SharedCdpClient = Arc<dyn CdpClient>;
