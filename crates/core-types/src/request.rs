use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::NodeId;

/// Search algorithms the server knows how to stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "dijkstra")]
    Dijkstra,
    #[serde(rename = "astar")]
    AStar,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Dijkstra, Algorithm::AStar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Dijkstra => "dijkstra",
            Algorithm::AStar => "astar",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dijkstra" => Ok(Algorithm::Dijkstra),
            "astar" | "a*" | "a-star" => Ok(Algorithm::AStar),
            other => Err(RequestError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum RequestError {
    #[error("decimation must be at least 1 (got {0})")]
    InvalidDecimation(u32),
    #[error("speed must be a positive finite number (got {0})")]
    InvalidSpeed(f64),
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
}

/// Server-side streaming knobs. `decimate` keeps one visited edge out of N,
/// `speed` scales the server's per-event throttle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub decimate: u32,
    pub speed: f64,
}

impl RunParams {
    pub fn new(decimate: u32, speed: f64) -> Result<Self, RequestError> {
        let params = Self { decimate, speed };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.decimate < 1 {
            return Err(RequestError::InvalidDecimation(self.decimate));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(RequestError::InvalidSpeed(self.speed));
        }
        Ok(())
    }
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            decimate: 1,
            speed: 1.0,
        }
    }
}

/// A single search run to execute on the server. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(rename = "alg")]
    algorithm: Algorithm,
    #[serde(rename = "orig")]
    origin: NodeId,
    #[serde(rename = "dest")]
    destination: NodeId,
    params: RunParams,
}

impl RunRequest {
    pub fn new(
        algorithm: Algorithm,
        origin: NodeId,
        destination: NodeId,
        params: RunParams,
    ) -> Result<Self, RequestError> {
        params.validate()?;
        Ok(Self {
            algorithm,
            origin,
            destination,
            params,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn params(&self) -> RunParams {
        self.params
    }

    /// Wire encoding: one JSON object per frame.
    pub fn encode(&self) -> String {
        // Plain structs of numbers and enums cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}
