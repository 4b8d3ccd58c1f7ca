use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkEntryState {
    Pending,
    Completed,
    Failed,
}

/// One request observed by the network watcher. Sensitive header values are
/// redacted before the entry is stored, so this type never carries secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedNetworkEntry {
    pub seq: u64,
    pub method: String,
    pub url: String,
    pub resource_type: String,
    pub timestamp_ms: i64,
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub body_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub state: NetworkEntryState,
}
