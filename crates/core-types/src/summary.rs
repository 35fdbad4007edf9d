use serde::{Deserialize, Serialize};

use crate::event::DoneEvent;
use crate::ids::NodeId;
use crate::request::{Algorithm, RunRequest};

/// Result of one completed run. Built once from the run's `done` event and
/// the request that started it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub algorithm: Algorithm,
    pub origin: NodeId,
    pub destination: NodeId,
    pub explored_count: u64,
    pub elapsed_seconds: f64,
    pub distance_km: f64,
}

impl RunSummary {
    pub fn from_done(request: &RunRequest, done: &DoneEvent) -> Self {
        Self {
            algorithm: request.algorithm(),
            origin: request.origin(),
            destination: request.destination(),
            explored_count: done.nodes_explored.unwrap_or(0),
            elapsed_seconds: done.time_s.unwrap_or(0.0),
            distance_km: done.distance_km.unwrap_or(0.0),
        }
    }

    pub fn key(&self) -> StatsKey {
        StatsKey {
            algorithm: self.algorithm,
            origin: self.origin,
            destination: self.destination,
        }
    }
}

/// Registry key: one summary per algorithm and endpoint pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct StatsKey {
    pub algorithm: Algorithm,
    pub origin: NodeId,
    pub destination: NodeId,
}

/// Side-by-side summaries for the same endpoint pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub dijkstra: RunSummary,
    pub astar: RunSummary,
    pub origin: NodeId,
    pub destination: NodeId,
}

impl ComparisonResult {
    /// Explored-node ratio of Dijkstra over A*; `None` when A* explored nothing.
    pub fn exploration_ratio(&self) -> Option<f64> {
        if self.astar.explored_count == 0 {
            return None;
        }
        Some(self.dijkstra.explored_count as f64 / self.astar.explored_count as f64)
    }

    pub fn same_distance(&self, tolerance_km: f64) -> bool {
        (self.dijkstra.distance_km - self.astar.distance_km).abs() <= tolerance_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RunParams;

    #[test]
    fn summary_defaults_missing_fields_to_zero() {
        let request = RunRequest::new(
            Algorithm::Dijkstra,
            NodeId(1),
            NodeId(2),
            RunParams::default(),
        )
        .unwrap();
        let summary = RunSummary::from_done(
            &request,
            &DoneEvent {
                nodes_explored: Some(50),
                time_s: None,
                distance_km: Some(3.2),
            },
        );
        assert_eq!(summary.explored_count, 50);
        assert_eq!(summary.elapsed_seconds, 0.0);
        assert_eq!(summary.key().origin, NodeId(1));
    }
}
