//! Shared test support: an in-memory `CdpClient` and fixture builders for
//! raw extractions, snapshots, and whole fake pages.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::BrowserError;
use crate::Result;
use crate::cdp::CdpClient;
use crate::cdp::EventHandler;

type Router = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Scriptable CDP double. Responses are served per method from one-shot
/// queues, then parameter-sensitive routes, then static defaults.
#[derive(Default)]
pub struct FakeCdpClient {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    defaults: Mutex<HashMap<String, Value>>,
    queued: Mutex<HashMap<String, VecDeque<Value>>>,
    failures: Mutex<HashMap<String, String>>,
    routes: Mutex<HashMap<String, Router>>,
    calls: Mutex<Vec<(String, Value)>>,
    inactive: AtomicBool,
}

impl FakeCdpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: &str, value: Value) {
        locked(&self.defaults).insert(method.to_string(), value);
    }

    pub fn push_response(&self, method: &str, value: Value) {
        locked(&self.queued)
            .entry(method.to_string())
            .or_default()
            .push_back(value);
    }

    pub fn fail_with(&self, method: &str, message: &str) {
        locked(&self.failures).insert(method.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, method: &str) {
        locked(&self.failures).remove(method);
    }

    pub fn set_route<F>(&self, method: &str, route: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        locked(&self.routes).insert(method.to_string(), Box::new(route));
    }

    pub fn set_active(&self, active: bool) {
        self.inactive.store(!active, Ordering::SeqCst);
    }

    /// Deliver an event to every registered handler, synchronously.
    pub fn emit(&self, event: &str, params: &Value) {
        let targets: Vec<EventHandler> = locked(&self.handlers)
            .get(event)
            .cloned()
            .unwrap_or_default();
        for handler in targets {
            handler(params);
        }
    }

    pub fn calls_for(&self, method: &str) -> Vec<Value> {
        locked(&self.calls)
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl CdpClient for FakeCdpClient {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        locked(&self.calls).push((method.to_string(), params.clone()));

        if let Some(message) = locked(&self.failures).get(method).cloned() {
            return Err(BrowserError::CdpError(message));
        }
        if let Some(next) = locked(&self.queued)
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Ok(next);
        }
        if let Some(route) = locked(&self.routes).get(method) {
            if let Some(response) = route(&params) {
                return Ok(response);
            }
        }
        if let Some(default) = locked(&self.defaults).get(method).cloned() {
            return Ok(default);
        }
        Ok(json!({}))
    }

    fn on(&self, event: &str, handler: EventHandler) {
        locked(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn is_active(&self) -> bool {
        !self.inactive.load(Ordering::SeqCst)
    }
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub mod fixtures {
    use super::*;
    use crate::compiler::CompileInput;
    use crate::extractor::RawExtraction;
    use crate::model::BBox;
    use crate::model::BaseSnapshot;
    use crate::model::FrameState;
    use crate::model::Locator;
    use crate::model::NodeKind;
    use crate::model::NodeState;
    use crate::model::ReadableNode;
    use crate::model::SnapshotMeta;
    use crate::model::Viewport;
    use chrono::Utc;

    pub const MAIN_FRAME: &str = "F-main";
    pub const MAIN_LOADER: &str = "L-1";
    pub const PAGE_URL: &str = "https://example.test/";

    pub fn main_frame() -> FrameState {
        FrameState {
            frame_id: MAIN_FRAME.to_string(),
            loader_id: MAIN_LOADER.to_string(),
            url: PAGE_URL.to_string(),
            is_main: true,
        }
    }

    /// Minimal readable node in the main frame.
    pub fn node(backend_node_id: u64, kind: NodeKind, label: &str) -> ReadableNode {
        ReadableNode {
            node_id: backend_node_id,
            backend_node_id,
            frame_id: MAIN_FRAME.to_string(),
            loader_id: MAIN_LOADER.to_string(),
            kind,
            label: label.to_string(),
            role: Some(kind.to_string()),
            placement: Default::default(),
            bbox: Some(BBox {
                x: 10.0,
                y: 10.0,
                w: 100.0,
                h: 24.0,
            }),
            z_index: None,
            display: Some("block".to_string()),
            screen_zone: None,
            visible: true,
            state: NodeState {
                visible: Some(true),
                enabled: kind.is_interactive().then_some(true),
                ..Default::default()
            },
            attrs: Default::default(),
            find: Locator {
                primary: format!("role={kind}[name=\"{label}\"]"),
                alternates: Vec::new(),
            },
            parent_backend_id: None,
        }
    }

    pub fn snapshot_with(nodes: Vec<ReadableNode>) -> BaseSnapshot {
        let interactive_count = nodes.iter().filter(|n| n.kind.is_interactive()).count();
        BaseSnapshot {
            snapshot_id: "snap-test".to_string(),
            page_id: "page-1".to_string(),
            url: PAGE_URL.to_string(),
            title: "Example".to_string(),
            captured_at: Utc::now(),
            viewport: Viewport::default(),
            meta: SnapshotMeta {
                node_count: nodes.len(),
                interactive_count,
                warnings: Vec::new(),
            },
            nodes,
            frames: vec![main_frame()],
        }
    }

    /// Declarative raw-node spec for extraction/compile fixtures and fake
    /// pages.
    #[derive(Clone, Copy)]
    pub struct RawSpec {
        pub backend_id: u64,
        pub tag: &'static str,
        pub role: &'static str,
        pub name: &'static str,
        pub attrs: &'static [(&'static str, &'static str)],
        pub bbox: Option<BBox>,
        pub parent: Option<u64>,
        pub z_index: Option<i64>,
        pub props: &'static [(&'static str, bool)],
    }

    impl Default for RawSpec {
        fn default() -> Self {
            Self {
                backend_id: 10,
                tag: "button",
                role: "button",
                name: "",
                attrs: &[],
                bbox: None,
                parent: None,
                z_index: None,
                props: &[],
            }
        }
    }

    const DOC_BACKEND_ID: u64 = 1;

    pub fn raw_page(specs: &[RawSpec]) -> RawExtraction {
        let mut out = RawExtraction::default();
        out.dom.insert(
            DOC_BACKEND_ID,
            crate::extractor::RawDomNode {
                node_id: DOC_BACKEND_ID,
                backend_node_id: DOC_BACKEND_ID,
                node_name: "#document".to_string(),
                node_type: 9,
                attributes: HashMap::new(),
                node_value: None,
                parent_backend_id: None,
                frame_id: Some(MAIN_FRAME.to_string()),
            },
        );
        out.dom_order.push(DOC_BACKEND_ID);

        for spec in specs {
            out.dom.insert(
                spec.backend_id,
                crate::extractor::RawDomNode {
                    node_id: spec.backend_id,
                    backend_node_id: spec.backend_id,
                    node_name: spec.tag.to_ascii_uppercase(),
                    node_type: 1,
                    attributes: spec
                        .attrs
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                    node_value: None,
                    parent_backend_id: Some(spec.parent.unwrap_or(DOC_BACKEND_ID)),
                    frame_id: Some(MAIN_FRAME.to_string()),
                },
            );
            out.dom_order.push(spec.backend_id);

            out.ax.push(crate::extractor::RawAxNode {
                ax_id: format!("ax-{}", spec.backend_id),
                role: Some(spec.role.to_string()),
                name: (!spec.name.is_empty()).then(|| spec.name.to_string()),
                ignored: false,
                backend_dom_node_id: Some(spec.backend_id),
                properties: spec
                    .props
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), Value::Bool(*v)))
                    .collect(),
                value: None,
            });

            if let Some(bbox) = spec.bbox {
                out.layout.insert(spec.backend_id, bbox);
            }
            if spec.z_index.is_some() {
                out.styles.insert(
                    spec.backend_id,
                    crate::extractor::RawStyle {
                        display: Some("block".to_string()),
                        visibility: None,
                        z_index: spec.z_index,
                    },
                );
            }
        }
        out
    }

    pub fn compile_input(raw: RawExtraction) -> CompileInput {
        CompileInput {
            raw,
            frames: vec![main_frame()],
            viewport: Viewport::default(),
            url: PAGE_URL.to_string(),
            title: "Example".to_string(),
            page_id: "page-1".to_string(),
        }
    }

    /// Wire a fake client so a full capture pass (frames, DOM, AX, layout,
    /// style, probes) serves the given page content.
    pub struct PageFixture {
        pub specs: Vec<RawSpec>,
        pub url: String,
        pub title: String,
        pub loader: String,
    }

    impl PageFixture {
        pub fn new(specs: Vec<RawSpec>) -> Self {
            Self {
                specs,
                url: PAGE_URL.to_string(),
                title: "Example".to_string(),
                loader: MAIN_LOADER.to_string(),
            }
        }
    }

    pub fn install_page(client: &FakeCdpClient, fixture: &PageFixture) {
        client.respond(
            "Page.getFrameTree",
            json!({
                "frameTree": {
                    "frame": {
                        "id": MAIN_FRAME,
                        "loaderId": fixture.loader,
                        "url": fixture.url
                    },
                    "childFrames": []
                }
            }),
        );

        client.respond("DOM.getDocument", json!({ "root": dom_document(&fixture.specs) }));
        client.respond(
            "Accessibility.getFullAXTree",
            json!({ "nodes": ax_nodes(&fixture.specs) }),
        );

        let specs = fixture.specs.clone();
        client.set_route("DOM.getBoxModel", move |params| {
            let backend_id = params.get("backendNodeId")?.as_u64()?;
            let spec = specs.iter().find(|spec| spec.backend_id == backend_id)?;
            let bbox = spec.bbox?;
            Some(json!({
                "model": {
                    "content": [bbox.x, bbox.y, bbox.x + bbox.w, bbox.y,
                                bbox.x + bbox.w, bbox.y + bbox.h, bbox.x, bbox.y + bbox.h],
                    "width": bbox.w,
                    "height": bbox.h
                }
            }))
        });

        let specs = fixture.specs.clone();
        client.set_route("CSS.getComputedStyleForNode", move |params| {
            let node_id = params.get("nodeId")?.as_u64()?;
            let spec = specs.iter().find(|spec| spec.backend_id == node_id)?;
            let mut entries = vec![json!({ "name": "display", "value": "block" })];
            if let Some(z_index) = spec.z_index {
                entries.push(json!({ "name": "z-index", "value": z_index.to_string() }));
            }
            Some(json!({ "computedStyle": entries }))
        });

        let title = fixture.title.clone();
        client.set_route("Runtime.evaluate", move |params| {
            let expression = params.get("expression")?.as_str()?;
            if expression.contains("document.title") {
                return Some(json!({ "result": { "value": title } }));
            }
            if expression.contains("clientWidth") {
                return Some(json!({ "result": { "value": { "w": 1280, "h": 720, "dpr": 1.0 } } }));
            }
            if expression.contains("__pd_mutations") {
                return Some(json!({ "result": { "value": 0 } }));
            }
            Some(json!({ "result": { "value": Value::Null } }))
        });
    }

    fn dom_document(specs: &[RawSpec]) -> Value {
        let mut children_of: HashMap<u64, Vec<&RawSpec>> = HashMap::new();
        for spec in specs {
            children_of
                .entry(spec.parent.unwrap_or(DOC_BACKEND_ID))
                .or_default()
                .push(spec);
        }

        fn node_json(spec: &RawSpec, children_of: &HashMap<u64, Vec<&RawSpec>>) -> Value {
            let attributes: Vec<Value> = spec
                .attrs
                .iter()
                .flat_map(|(k, v)| [json!(k), json!(v)])
                .collect();
            let children: Vec<Value> = children_of
                .get(&spec.backend_id)
                .map(|list| {
                    list.iter()
                        .map(|child| node_json(child, children_of))
                        .collect()
                })
                .unwrap_or_default();
            json!({
                "nodeId": spec.backend_id,
                "backendNodeId": spec.backend_id,
                "nodeName": spec.tag.to_ascii_uppercase(),
                "nodeType": 1,
                "attributes": attributes,
                "children": children
            })
        }

        let top_level: Vec<Value> = children_of
            .get(&DOC_BACKEND_ID)
            .map(|list| {
                list.iter()
                    .map(|child| node_json(child, &children_of))
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "nodeId": DOC_BACKEND_ID,
            "backendNodeId": DOC_BACKEND_ID,
            "nodeName": "#document",
            "nodeType": 9,
            "frameId": MAIN_FRAME,
            "children": top_level
        })
    }

    fn ax_nodes(specs: &[RawSpec]) -> Vec<Value> {
        specs
            .iter()
            .map(|spec| {
                let properties: Vec<Value> = spec
                    .props
                    .iter()
                    .map(|(name, value)| {
                        json!({ "name": name, "value": { "type": "boolean", "value": value } })
                    })
                    .collect();
                json!({
                    "nodeId": format!("ax-{}", spec.backend_id),
                    "ignored": false,
                    "role": { "type": "role", "value": spec.role },
                    "name": { "type": "computedString", "value": spec.name },
                    "backendDOMNodeId": spec.backend_id,
                    "properties": properties
                })
            })
            .collect()
    }
}
