//! Trace state for the routewatch client.
//!
//! Two owners with different lifetimes live here: [`EdgeCoordinateCache`]
//! keeps edge geometry for the whole session, while [`TraceAccumulator`]
//! keeps only the marks (visited edges, route edges, algorithm) of the run
//! that is currently live.

pub mod accumulator;
pub mod cache;

pub use accumulator::{
    ApplyOutcome, IgnoreReason, RunOutcome, TraceAccumulator, TraceSnapshot, TraceState,
};
pub use cache::EdgeCoordinateCache;
