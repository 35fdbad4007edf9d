use std::path::PathBuf;

use routewatch_core_types::{Algorithm, RunParams};
use serde::{Deserialize, Serialize};
use trace_link::LinkConfig;

/// Top-level CLI configuration, read from YAML.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub run: RunDefaults,
    /// Write the stats registry here after every `run` or `compare`.
    pub stats_export: Option<PathBuf>,
}

/// Defaults for run requests when flags are omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    pub algorithm: Algorithm,
    pub decimate: u32,
    pub speed: f64,
    pub timeout_secs: u64,
    /// Merge the bulk edge sample into the geometry cache before running.
    pub seed_decimate: Option<u32>,
}

impl Default for RunDefaults {
    fn default() -> Self {
        let params = RunParams::default();
        Self {
            algorithm: Algorithm::Dijkstra,
            decimate: params.decimate,
            speed: params.speed,
            timeout_secs: 120,
            seed_decimate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let raw = "link:\n  api_url: http://graph.local:9000\nrun:\n  algorithm: astar\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.link.api_url, "http://graph.local:9000");
        assert_eq!(config.link.retry_max_ms, 10_000);
        assert_eq!(config.run.algorithm, Algorithm::AStar);
        assert_eq!(config.run.timeout_secs, 120);
        assert!(config.stats_export.is_none());
    }
}
