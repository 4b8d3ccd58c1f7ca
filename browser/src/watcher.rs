//! Agent-visible network observation. Separate from the idle tracker: this
//! accumulates filtered request/response entries (with redacted headers and
//! bounded bodies) until the agent drains them.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use pagedelta_protocol::CapturedNetworkEntry;
use pagedelta_protocol::NetworkEntryState;

use crate::Result;
use crate::cdp::SharedCdpClient;
use crate::cdp::events;

const SENSITIVE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

const TEXT_LIKE_TYPES: [&str; 8] = [
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-www-form-urlencoded",
    "application/graphql",
    "application/ld+json",
    "application/hal+json",
    "application/vnd.api+json",
];

#[derive(Debug, Clone)]
struct EntryRecord {
    seq: u64,
    generation: u64,
    request_id: String,
    method: String,
    url: String,
    resource_type: String,
    timestamp_ms: i64,
    started: Instant,
    request_headers: BTreeMap<String, String>,
    request_body: Option<String>,
    status: Option<u16>,
    status_text: Option<String>,
    response_headers: Option<BTreeMap<String, String>>,
    mime_type: Option<String>,
    duration_ms: Option<u64>,
    failure_reason: Option<String>,
    state: NetworkEntryState,
}

#[derive(Default)]
struct WatcherInner {
    generation: u64,
    next_seq: u64,
    entries: Vec<EntryRecord>,
    by_request: HashMap<String, usize>,
}

pub struct NetworkWatcher {
    client: SharedCdpClient,
    /// Lowercased resource types to capture.
    filter: Vec<String>,
    max_body_size: usize,
    inner: Arc<Mutex<WatcherInner>>,
}

impl NetworkWatcher {
    /// Enable the Network domain and start accumulating entries for the
    /// requested resource types (e.g. `["xhr", "fetch"]`). An empty list
    /// selects the default `xhr` filter.
    pub async fn attach(
        client: SharedCdpClient,
        resource_types: &[&str],
        max_body_size: usize,
    ) -> Result<Arc<Self>> {
        client.send("Network.enable", json!({})).await?;

        let filter = if resource_types.is_empty() {
            vec!["xhr".to_string()]
        } else {
            resource_types
                .iter()
                .map(|kind| kind.to_ascii_lowercase())
                .collect()
        };
        let watcher = Arc::new(Self {
            filter,
            max_body_size,
            inner: Arc::new(Mutex::new(WatcherInner::default())),
            client,
        });

        let filter = watcher.filter.clone();
        let on_request = Arc::clone(&watcher.inner);
        watcher.client.on(
            events::REQUEST_WILL_BE_SENT,
            Arc::new(move |params: &Value| {
                handle_request(&on_request, &filter, params);
            }),
        );

        let on_response = Arc::clone(&watcher.inner);
        watcher.client.on(
            events::RESPONSE_RECEIVED,
            Arc::new(move |params: &Value| {
                handle_response(&on_response, params);
            }),
        );

        let on_finished = Arc::clone(&watcher.inner);
        watcher.client.on(
            events::LOADING_FINISHED,
            Arc::new(move |params: &Value| {
                finalize(&on_finished, params, None);
            }),
        );

        let on_failed = Arc::clone(&watcher.inner);
        watcher.client.on(
            events::LOADING_FAILED,
            Arc::new(move |params: &Value| {
                let reason = params
                    .get("errorText")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string();
                finalize(&on_failed, params, Some(reason));
            }),
        );

        Ok(watcher)
    }

    /// Bump the generation. Entries still pending from the old document are
    /// dropped; the event handlers stay registered so the filter persists.
    pub fn mark_navigation(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries.retain(|entry| {
            entry.generation == generation || entry.state != NetworkEntryState::Pending
        });
        inner.by_request.clear();
        let survivors: Vec<(String, usize)> = inner
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.request_id.clone(), index))
            .collect();
        inner.by_request.extend(survivors);
        debug!(generation, "Network watcher generation advanced");
    }

    /// Drain accumulated entries. Still-pending requests are reported with
    /// state `pending`; response bodies are fetched here, only for
    /// text-like content, truncated at the configured cap.
    pub async fn get_and_clear(&self) -> Vec<CapturedNetworkEntry> {
        let drained: Vec<EntryRecord> = {
            let mut inner = lock(&self.inner);
            inner.by_request.clear();
            std::mem::take(&mut inner.entries)
        };

        let mut out = Vec::with_capacity(drained.len());
        for record in drained {
            let mut response_body = None;
            let mut body_truncated = false;
            if record.state == NetworkEntryState::Completed
                && record.mime_type.as_deref().is_some_and(is_text_like)
            {
                if let Ok(value) = self
                    .client
                    .send(
                        "Network.getResponseBody",
                        json!({ "requestId": record.request_id }),
                    )
                    .await
                {
                    if let Some(body) = value.get("body").and_then(Value::as_str) {
                        let (text, truncated) = truncate_body(body, self.max_body_size);
                        response_body = Some(text);
                        body_truncated = truncated;
                    }
                }
            }

            out.push(CapturedNetworkEntry {
                seq: record.seq,
                method: record.method,
                url: record.url,
                resource_type: record.resource_type,
                timestamp_ms: record.timestamp_ms,
                request_headers: record.request_headers,
                request_body: record.request_body,
                status: record.status,
                status_text: record.status_text,
                duration_ms: record.duration_ms,
                response_headers: record.response_headers,
                response_body,
                body_truncated,
                failure_reason: record.failure_reason,
                state: record.state,
            });
        }
        out
    }
}

fn handle_request(inner: &Arc<Mutex<WatcherInner>>, filter: &[String], params: &Value) {
    let resource_type = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("other")
        .to_ascii_lowercase();
    if !filter.contains(&resource_type) {
        return;
    }
    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let Some(request) = params.get("request") else {
        return;
    };

    let mut inner = lock(inner);
    inner.next_seq += 1;
    let record = EntryRecord {
        seq: inner.next_seq,
        generation: inner.generation,
        request_id: request_id.to_string(),
        method: request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_string(),
        url: request
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        resource_type,
        timestamp_ms: Utc::now().timestamp_millis(),
        started: Instant::now(),
        request_headers: redact_headers(request.get("headers")),
        request_body: request
            .get("postData")
            .and_then(Value::as_str)
            .map(str::to_string),
        status: None,
        status_text: None,
        response_headers: None,
        mime_type: None,
        duration_ms: None,
        failure_reason: None,
        state: NetworkEntryState::Pending,
    };
    let index = inner.entries.len();
    inner.entries.push(record);
    inner.by_request.insert(request_id.to_string(), index);
}

fn handle_response(inner: &Arc<Mutex<WatcherInner>>, params: &Value) {
    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let Some(response) = params.get("response") else {
        return;
    };
    let mut inner = lock(inner);
    let Some(&index) = inner.by_request.get(request_id) else {
        return;
    };
    let entry = &mut inner.entries[index];
    entry.status = response
        .get("status")
        .and_then(Value::as_u64)
        .map(|status| status as u16);
    entry.status_text = response
        .get("statusText")
        .and_then(Value::as_str)
        .map(str::to_string);
    entry.response_headers = Some(redact_headers(response.get("headers")));
    entry.mime_type = response
        .get("mimeType")
        .and_then(Value::as_str)
        .map(str::to_string);
}

fn finalize(inner: &Arc<Mutex<WatcherInner>>, params: &Value, failure: Option<String>) {
    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let mut inner = lock(inner);
    let Some(&index) = inner.by_request.get(request_id) else {
        return;
    };
    let entry = &mut inner.entries[index];
    entry.duration_ms = Some(entry.started.elapsed().as_millis() as u64);
    match failure {
        Some(reason) => {
            entry.state = NetworkEntryState::Failed;
            entry.failure_reason = Some(reason);
        }
        None => entry.state = NetworkEntryState::Completed,
    }
}

fn lock(inner: &Arc<Mutex<WatcherInner>>) -> std::sync::MutexGuard<'_, WatcherInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn redact_headers(headers: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(map) = headers.and_then(Value::as_object) else {
        return out;
    };
    for (name, value) in map {
        let rendered = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        if SENSITIVE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            out.insert(name.clone(), "***".to_string());
        } else {
            out.insert(name.clone(), rendered);
        }
    }
    out
}

fn is_text_like(mime_type: &str) -> bool {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/")
        || TEXT_LIKE_TYPES.contains(&mime.as_str())
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
}

/// Byte-bounded truncation that never splits a UTF-8 character.
fn truncate_body(body: &str, max_bytes: usize) -> (String, bool) {
    if body.len() <= max_bytes {
        return (body.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    (body[..cut].to_string(), true)
}
