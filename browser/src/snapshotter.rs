//! Capture orchestration: one call runs the extractor pipeline, compiles
//! the snapshot, and registers a ref for every node the agent can now
//! address.

use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::cdp::SharedCdpClient;
use crate::compiler::CompileInput;
use crate::compiler::SnapshotCompiler;
use crate::extractor::ExtractorPipeline;
use crate::frames::FrameTracker;
use crate::model::BaseSnapshot;
use crate::model::Viewport;

pub struct Snapshotter {
    client: SharedCdpClient,
    frames: Arc<FrameTracker>,
    page_id: String,
}

impl Snapshotter {
    pub fn new(client: SharedCdpClient, frames: Arc<FrameTracker>, page_id: String) -> Self {
        Self {
            client,
            frames,
            page_id,
        }
    }

    pub async fn capture(&self) -> Result<BaseSnapshot> {
        self.frames.initialize().await?;

        let pipeline = ExtractorPipeline::new(Arc::clone(&self.client));
        let raw = pipeline.extract().await;

        let viewport = match pipeline.probe_viewport().await {
            Some((width, height, device_pixel_ratio)) => Viewport {
                width,
                height,
                device_pixel_ratio,
            },
            None => Viewport::default(),
        };
        let title = pipeline.probe_title().await.unwrap_or_default();
        let url = self
            .frames
            .main_frame()
            .map(|frame| frame.url)
            .unwrap_or_default();

        let snapshot = SnapshotCompiler::compile(CompileInput {
            raw,
            frames: self.frames.frames_snapshot(),
            viewport,
            url,
            title,
            page_id: self.page_id.clone(),
        });

        // Every node in a delivered snapshot is addressable; record the
        // refs so later invalidations cover them.
        for node in &snapshot.nodes {
            self.frames.create_ref(node.backend_node_id, &node.frame_id);
        }

        debug!(
            page = %self.page_id,
            nodes = snapshot.meta.node_count,
            "Capture complete"
        );
        Ok(snapshot)
    }
}
