//! routewatch command-line client.
//!
//! Exposes the CLI modules and configuration for integration testing.

pub mod cli;
pub mod config;
pub mod metrics;

pub use config::{Config, RunDefaults};
