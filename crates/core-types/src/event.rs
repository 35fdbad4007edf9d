//! Server→client trace events and their frame codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{EdgeId, NodeId, Polyline};
use crate::request::Algorithm;

const KNOWN_KINDS: [&str; 6] = ["status", "visited", "path", "progress", "done", "error"];

/// Reasons a frame could not be turned into a [`TraceEvent`].
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` field")]
    MissingKind,
    #[error("unknown event type `{0}`")]
    UnknownKind(String),
    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
}

/// Payload of a `visited` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub u: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Polyline>,
}

impl EdgeEvent {
    /// Explicit id if present, otherwise derived from the endpoints.
    pub fn edge_id(&self) -> Option<EdgeId> {
        resolve_edge_id(self.edge_id.as_ref(), self.u, self.v, self.k)
    }
}

/// Payload of a `path` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub u: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Polyline>,
}

impl PathEvent {
    pub fn edge_id(&self) -> Option<EdgeId> {
        resolve_edge_id(self.edge_id.as_ref(), self.u, self.v, self.k)
    }

    /// Position on the final route; a missing order sorts first.
    pub fn order(&self) -> u64 {
        self.order.unwrap_or(0)
    }
}

/// Payload of the terminal `done` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_explored: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// One frame of the trace stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceEvent {
    Status(StatusEvent),
    Visited(EdgeEvent),
    Path(PathEvent),
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explored: Option<u64>,
    },
    Done(DoneEvent),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },
}

impl TraceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::Status(_) => "status",
            TraceEvent::Visited(_) => "visited",
            TraceEvent::Path(_) => "path",
            TraceEvent::Progress { .. } => "progress",
            TraceEvent::Done(_) => "done",
            TraceEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceEvent::Done(_) | TraceEvent::Error { .. })
    }

    /// Decode a single text frame.
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(frame).map_err(|err| FrameError::Json(err.to_string()))?;
        let object = value.as_object().ok_or(FrameError::NotAnObject)?;
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) | None => return Err(FrameError::MissingKind),
        };
        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Err(FrameError::UnknownKind(kind));
        }
        serde_json::from_value(value).map_err(|err| FrameError::InvalidPayload {
            kind,
            reason: err.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn resolve_edge_id(
    explicit: Option<&EdgeId>,
    u: Option<NodeId>,
    v: Option<NodeId>,
    k: Option<u32>,
) -> Option<EdgeId> {
    if let Some(id) = explicit {
        return Some(id.clone());
    }
    match (u, v, k) {
        (Some(u), Some(v), Some(k)) => Some(EdgeId::from_endpoints(u, v, k)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LatLon;

    #[test]
    fn decodes_server_frames() {
        let status = TraceEvent::decode(
            r#"{"type":"status","msg":"started","algorithm":"dijkstra","orig":1,"dest":9}"#,
        )
        .unwrap();
        assert_eq!(
            status,
            TraceEvent::Status(StatusEvent {
                msg: Some("started".into()),
                algorithm: Some(Algorithm::Dijkstra),
                orig: Some(NodeId(1)),
                dest: Some(NodeId(9)),
                node: None,
            })
        );

        let visited = TraceEvent::decode(
            r#"{"type":"visited","edge_id":"1|2|0","u":1,"v":2,"k":0,"weight":3.5,
                "coords":[[-27.1,-58.1],[-27.2,-58.2]]}"#,
        )
        .unwrap();
        let TraceEvent::Visited(edge) = visited else {
            panic!("expected visited event");
        };
        assert_eq!(edge.edge_id(), Some(EdgeId::from("1|2|0")));
        assert_eq!(
            edge.coords,
            Some(vec![LatLon(-27.1, -58.1), LatLon(-27.2, -58.2)])
        );

        let done = TraceEvent::decode(
            r#"{"type":"done","nodes_explored":50,"time_s":0.01,"distance_km":3.2}"#,
        )
        .unwrap();
        assert!(done.is_terminal());
    }

    #[test]
    fn derives_edge_id_from_endpoints() {
        let path = TraceEvent::decode(r#"{"type":"path","u":4,"v":5,"k":1,"order":2}"#).unwrap();
        let TraceEvent::Path(path) = path else {
            panic!("expected path event");
        };
        assert_eq!(path.edge_id(), Some(EdgeId::from("4|5|1")));
        assert_eq!(path.order(), 2);
    }

    #[test]
    fn classifies_malformed_frames() {
        assert!(matches!(TraceEvent::decode("{not json"), Err(FrameError::Json(_))));
        assert_eq!(TraceEvent::decode("[1,2]"), Err(FrameError::NotAnObject));
        assert_eq!(
            TraceEvent::decode(r#"{"msg":"hi"}"#),
            Err(FrameError::MissingKind)
        );
        assert_eq!(
            TraceEvent::decode(r#"{"type":"teleport"}"#),
            Err(FrameError::UnknownKind("teleport".into()))
        );
        assert!(matches!(
            TraceEvent::decode(r#"{"type":"progress","explored":"many"}"#),
            Err(FrameError::InvalidPayload { .. })
        ));
    }
}
