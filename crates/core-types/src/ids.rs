use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Graph node identifier as handed out by the server (OSM node ids).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Client-side identity of one transmitted run request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("malformed edge id `{0}`; expected `u|v|k`")]
pub struct EdgeIdError(pub String);

/// Stable key for a directed edge: `"{u}|{v}|{k}"`, where `k` separates
/// parallel edges between the same endpoints.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn from_endpoints(u: NodeId, v: NodeId, k: u32) -> Self {
        Self(format!("{}|{}|{}", u.0, v.0, k))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id back into its endpoints and discriminator.
    pub fn endpoints(&self) -> Result<(NodeId, NodeId, u32), EdgeIdError> {
        let mut parts = self.0.split('|');
        let (Some(u), Some(v), Some(k), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(EdgeIdError(self.0.clone()));
        };
        let parse = |raw: &str| raw.trim().parse::<u64>().map_err(|_| EdgeIdError(self.0.clone()));
        let k = k
            .trim()
            .parse::<u32>()
            .map_err(|_| EdgeIdError(self.0.clone()))?;
        Ok((NodeId(parse(u)?), NodeId(parse(v)?), k))
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EdgeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for EdgeId {
    type Err = EdgeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = EdgeId(s.to_string());
        id.endpoints()?;
        Ok(id)
    }
}

/// One `[lat, lon]` vertex of an edge polyline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    pub fn lat(&self) -> f64 {
        self.0
    }

    pub fn lon(&self) -> f64 {
        self.1
    }
}

pub type Polyline = Vec<LatLon>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_id_round_trips_endpoints() {
        let id = EdgeId::from_endpoints(NodeId(11), NodeId(42), 1);
        assert_eq!(id.as_str(), "11|42|1");
        assert_eq!(id.endpoints().unwrap(), (NodeId(11), NodeId(42), 1));
    }

    #[test]
    fn edge_id_rejects_garbage() {
        assert!("11|42".parse::<EdgeId>().is_err());
        assert!("a|b|c".parse::<EdgeId>().is_err());
        assert!("1|2|3|4".parse::<EdgeId>().is_err());
    }

    #[test]
    fn latlon_serializes_as_pair() {
        let json = serde_json::to_string(&LatLon(-27.47, -58.83)).unwrap();
        assert_eq!(json, "[-27.47,-58.83]");
    }
}
