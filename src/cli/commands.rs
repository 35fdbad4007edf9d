use clap::Subcommand;

use super::compare::CompareArgs;
use super::config::ConfigArgs;
use super::lookup::NearestArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Stream one search run and print its summary
    Run(RunArgs),

    /// Run Dijkstra and A* on the same endpoints and compare them
    Compare(CompareArgs),

    /// Find the graph node closest to a coordinate
    Nearest(NearestArgs),

    /// Show metadata of the loaded street graph
    Meta,

    /// Inspect or edit configuration
    Config(ConfigArgs),

    /// Show version, build and link information
    Info,

    /// Print link counters in Prometheus text format
    Metrics,
}
