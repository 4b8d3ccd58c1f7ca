//! Wire types exchanged between the page-delta engine and the tool front
//! door. Everything here is a plain serde record; the engine never hands a
//! pre-rendered string to the caller except the `snapshot` text inside the
//! `full` payload, which is derived from the same node data.

mod network;
mod payload;

pub use network::CapturedNetworkEntry;
pub use network::NetworkEntryState;
pub use payload::ActionDeltaPayload;
pub use payload::ActionReport;
pub use payload::ActionStatus;
pub use payload::BaseChanges;
pub use payload::ChangeType;
pub use payload::DeltaContext;
pub use payload::DeltaCounts;
pub use payload::ModifiedSummary;
pub use payload::NodeSummary;
pub use payload::OverlayInfo;
pub use payload::OverlayKind;
pub use payload::OverlayTransition;
pub use payload::PreviousOverlay;
pub use payload::ResponsePayload;
