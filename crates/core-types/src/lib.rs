//! Shared primitives for the routewatch trace client.
//!
//! Everything that crosses a crate boundary lives here: identifiers, the run
//! request sent to the search server, the trace events streamed back, and the
//! per-run summaries derived from them.

pub mod event;
pub mod ids;
pub mod request;
pub mod summary;

pub use event::{DoneEvent, EdgeEvent, FrameError, PathEvent, StatusEvent, TraceEvent};
pub use ids::{EdgeId, EdgeIdError, LatLon, NodeId, Polyline, RunId};
pub use request::{Algorithm, RequestError, RunParams, RunRequest};
pub use summary::{ComparisonResult, RunSummary, StatsKey};

use std::fmt;

/// Connection lifecycle as observed by callers of the link layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    WaitingToRetry,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::WaitingToRetry => "waiting_to_retry",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
