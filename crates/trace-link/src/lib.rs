//! routewatch link layer.
//!
//! Keeps one logical connection to the route-search server alive, sends one
//! run request at a time and hands every streamed event to the trace state of
//! the live run. The connection lifecycle is a table-driven state machine
//! ([`fsm`]) executed by a single driver task ([`manager`]); [`session`] wires
//! that driver to the accumulator, the geometry cache and the stats registry.

pub mod channel;
pub mod config;
pub mod error;
pub mod fault;
pub mod fsm;
pub mod graph_api;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod transport;

pub use channel::{ChannelListener, ChannelTransport, ServerEnd, ServerFrame};
pub use config::LinkConfig;
pub use error::{LinkError, LinkErrorKind};
pub use fault::{FaultCounts, FaultLog, FaultRecord, ProtocolFault, TraceFault, TransportFault};
pub use fsm::{LinkAction, LinkInput, LinkMachine, RetryPolicy};
pub use graph_api::{GraphApi, GraphMeta, NearestNode};
pub use manager::{ConnectionManager, FrameSink};
pub use metrics::LinkMetricsSnapshot;
pub use session::{SessionNotice, TerminalRun, TraceHub, TraceSession};
pub use transport::{InboundFrame, TraceConnection, TraceTransport, WsTransport};
