//! Read-only CDP extraction. Each sub-extractor queries one DevTools domain
//! and degrades to defaults plus a warning when the domain fails; nothing in
//! this module ever aborts a capture.

use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use crate::cdp::SharedCdpClient;
use crate::model::BBox;

mod ax;
mod dom;
mod layout;
mod style;

pub use ax::RawAxNode;
pub use dom::RawDomNode;
pub use style::RawStyle;

/// Everything one extraction pass learned, keyed by backend node id.
#[derive(Debug, Default)]
pub struct RawExtraction {
    pub dom: HashMap<u64, RawDomNode>,
    /// Backend node ids in DOM pre-order.
    pub dom_order: Vec<u64>,
    pub ax: Vec<RawAxNode>,
    pub layout: HashMap<u64, BBox>,
    pub styles: HashMap<u64, RawStyle>,
    pub warnings: Vec<String>,
}

pub struct ExtractorPipeline {
    client: SharedCdpClient,
}

impl ExtractorPipeline {
    pub fn new(client: SharedCdpClient) -> Self {
        Self { client }
    }

    /// Run one full extraction pass. Layout and computed style are only
    /// fetched for nodes the accessibility tree points at, which is the
    /// candidate set the compiler works from.
    pub async fn extract(&self) -> RawExtraction {
        let mut out = RawExtraction::default();

        dom::extract_dom(&self.client, &mut out).await;
        ax::extract_ax(&self.client, &mut out).await;

        let candidates: Vec<u64> = out
            .ax
            .iter()
            .filter(|ax_node| !ax_node.ignored)
            .filter_map(|ax_node| ax_node.backend_dom_node_id)
            .filter(|backend_id| out.dom.contains_key(backend_id))
            .collect();

        layout::extract_layout(&self.client, &candidates, &mut out).await;
        style::extract_styles(&self.client, &candidates, &mut out).await;

        debug!(
            dom_nodes = out.dom.len(),
            ax_nodes = out.ax.len(),
            boxed = out.layout.len(),
            styled = out.styles.len(),
            warnings = out.warnings.len(),
            "Extraction pass complete"
        );
        out
    }

    /// Layout viewport and device pixel ratio, probed in-page.
    pub async fn probe_viewport(&self) -> Option<(u32, u32, f64)> {
        let probe = r#"(() => ({
            w: (document.documentElement.clientWidth|0),
            h: (document.documentElement.clientHeight|0),
            dpr: (window.devicePixelRatio||1)
        }))()"#;
        let result = self
            .client
            .send(
                "Runtime.evaluate",
                json!({ "expression": probe, "returnByValue": true }),
            )
            .await
            .ok()?;
        let value = result.get("result")?.get("value")?;
        Some((
            value.get("w")?.as_u64()? as u32,
            value.get("h")?.as_u64()? as u32,
            value.get("dpr")?.as_f64().unwrap_or(1.0),
        ))
    }

    /// Page title via the runtime; failures fall back to an empty title.
    pub async fn probe_title(&self) -> Option<String> {
        let result = self
            .client
            .send(
                "Runtime.evaluate",
                json!({ "expression": "document.title", "returnByValue": true }),
            )
            .await
            .ok()?;
        result
            .get("result")?
            .get("value")?
            .as_str()
            .map(str::to_string)
    }
}
