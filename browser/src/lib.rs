//! Stateful page-delta engine for agent-driven browser automation.
//!
//! The crate sits between an agent-facing tool layer and a Chromium instance
//! reached over the DevTools Protocol. It compiles flat, element-addressable
//! page snapshots, issues frame-scoped element references, and answers every
//! action with either a delta against the agent's last-known view or a full
//! snapshot when a delta would be unreliable.

use thiserror::Error;

pub mod cdp;
pub mod compiler;
pub mod config;
pub mod executor;
pub mod extractor;
pub mod format;
pub mod frames;
pub mod idle;
pub mod model;
pub mod overlay;
pub mod registry;
pub mod snapshotter;
pub mod stabilize;
pub mod state;
pub mod version;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testutil;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("CDP error: {0}")]
    CdpError(String),

    #[error("CDP connection is not active")]
    NotConnected,

    #[error("frame {0} is not tracked")]
    UnknownFrame(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
