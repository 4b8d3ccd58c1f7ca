use serde_json::Value;
use serde_json::json;
use tracing::debug;

use super::RawExtraction;
use crate::cdp::SharedCdpClient;
use crate::model::BBox;

/// Fetch box models for the candidate set. A missing box model means the
/// element is not rendered; that is a normal outcome, not a warning.
pub(super) async fn extract_layout(
    client: &SharedCdpClient,
    candidates: &[u64],
    out: &mut RawExtraction,
) {
    for &backend_node_id in candidates {
        let response = client
            .send(
                "DOM.getBoxModel",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await;
        let Ok(value) = response else {
            continue;
        };
        if let Some(bbox) = bbox_from_model(&value) {
            out.layout.insert(backend_node_id, bbox);
        }
    }
    debug!(
        candidates = candidates.len(),
        rendered = out.layout.len(),
        "Layout extraction complete"
    );
}

/// The content quad is 8 numbers (4 corners); the box position is its first
/// corner, sized by the model's width/height.
fn bbox_from_model(value: &Value) -> Option<BBox> {
    let model = value.get("model")?;
    let content = model.get("content")?.as_array()?;
    let x = content.first()?.as_f64()?;
    let y = content.get(1)?.as_f64()?;
    let w = model.get("width")?.as_f64()?;
    let h = model.get("height")?.as_f64()?;
    Some(BBox { x, y, w, h })
}
