//! Turns one run's ordered event stream into renderable trace marks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use routewatch_core_types::{
    Algorithm, DoneEvent, EdgeEvent, EdgeId, PathEvent, Polyline, RunId, RunRequest, RunSummary,
    StatusEvent, TraceEvent,
};
use serde::Serialize;
use tracing::debug;

use crate::cache::EdgeCoordinateCache;

/// Where the live run stands.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed { summary: RunSummary },
    Failed { message: String },
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunOutcome::Running)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    /// No run has been started since the last clear.
    NoActiveRun,
    /// The event belongs to a run other than the live one.
    StaleRun,
    /// The live run already reached `done` or `error`.
    Frozen,
    /// An edge event without an id or a full set of endpoints.
    MissingEdgeId,
}

/// Result of feeding one event to the accumulator.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Updated,
    Ignored(IgnoreReason),
    Completed(RunSummary),
    Failed(String),
}

#[derive(Clone, Debug)]
struct LiveRun {
    id: RunId,
    request: RunRequest,
}

/// Marks of a single run. Owned by the accumulator for the run's lifetime.
#[derive(Clone, Debug)]
pub struct TraceState {
    run: Option<LiveRun>,
    status_algorithm: Option<Algorithm>,
    visited: Vec<EdgeId>,
    visited_index: HashSet<EdgeId>,
    // (order, arrival sequence) -> edge; iteration order is the exposed path.
    path_slots: BTreeMap<(u64, u64), EdgeId>,
    path_index: HashMap<EdgeId, (u64, u64)>,
    next_seq: u64,
    explored_count: u64,
    last_status: Option<String>,
    outcome: RunOutcome,
}

impl Default for TraceState {
    fn default() -> Self {
        Self {
            run: None,
            status_algorithm: None,
            visited: Vec::new(),
            visited_index: HashSet::new(),
            path_slots: BTreeMap::new(),
            path_index: HashMap::new(),
            next_seq: 0,
            explored_count: 0,
            last_status: None,
            outcome: RunOutcome::Running,
        }
    }
}

impl TraceState {
    fn for_run(id: RunId, request: RunRequest) -> Self {
        Self {
            run: Some(LiveRun { id, request }),
            ..Self::default()
        }
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run.as_ref().map(|run| run.id)
    }

    pub fn request(&self) -> Option<&RunRequest> {
        self.run.as_ref().map(|run| &run.request)
    }

    /// Algorithm announced by the first `status` event, falling back to the
    /// request's algorithm.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.status_algorithm
            .or_else(|| self.request().map(RunRequest::algorithm))
    }

    /// Visited edges in first-seen order, without duplicates.
    pub fn visited(&self) -> &[EdgeId] {
        &self.visited
    }

    /// Route edges sorted by their `order` field, ties by arrival.
    pub fn path(&self) -> Vec<EdgeId> {
        self.path_slots.values().cloned().collect()
    }

    pub fn is_on_path(&self, id: &EdgeId) -> bool {
        self.path_index.contains_key(id)
    }

    pub fn explored_count(&self) -> u64 {
        self.explored_count
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn outcome(&self) -> &RunOutcome {
        &self.outcome
    }

    /// True once the run reached `done` or `error`; no further mutation is accepted.
    pub fn is_frozen(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            run: self.run_id(),
            algorithm: self.algorithm(),
            visited: self.visited.clone(),
            path: self.path(),
            explored_count: self.explored_count,
            last_status: self.last_status.clone(),
            outcome: self.run.as_ref().map(|_| self.outcome.clone()),
        }
    }

    fn record_visited(&mut self, id: EdgeId) -> bool {
        if self.visited_index.insert(id.clone()) {
            self.visited.push(id);
            true
        } else {
            false
        }
    }

    fn record_path(&mut self, id: EdgeId, order: u64) {
        let seq = match self.path_index.get(&id) {
            Some(&(previous_order, seq)) => {
                self.path_slots.remove(&(previous_order, seq));
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };
        self.path_slots.insert((order, seq), id.clone());
        self.path_index.insert(id, (order, seq));
    }
}

/// Read-only copy of the live trace handed to renderers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceSnapshot {
    pub run: Option<RunId>,
    pub algorithm: Option<Algorithm>,
    pub visited: Vec<EdgeId>,
    pub path: Vec<EdgeId>,
    pub explored_count: u64,
    pub last_status: Option<String>,
    pub outcome: Option<RunOutcome>,
}

/// Consumes the ordered events of the live run. Geometry carried by events
/// goes to the shared [`EdgeCoordinateCache`]; only per-run marks stay here.
#[derive(Debug)]
pub struct TraceAccumulator {
    state: TraceState,
    cache: Arc<EdgeCoordinateCache>,
}

impl TraceAccumulator {
    pub fn new(cache: Arc<EdgeCoordinateCache>) -> Self {
        Self {
            state: TraceState::default(),
            cache,
        }
    }

    pub fn state(&self) -> &TraceState {
        &self.state
    }

    pub fn cache(&self) -> &Arc<EdgeCoordinateCache> {
        &self.cache
    }

    /// Start an empty trace owned by `run`, whatever the previous run's outcome.
    pub fn begin_run(&mut self, run: RunId, request: RunRequest) {
        debug!(target: "trace-state", %run, algorithm = %request.algorithm(), "begin run");
        self.state = TraceState::for_run(run, request);
    }

    /// Drop all trace marks. Cached geometry is kept.
    pub fn clear(&mut self) {
        self.state = TraceState::default();
    }

    pub fn apply(&mut self, run: RunId, event: TraceEvent) -> ApplyOutcome {
        match self.state.run_id() {
            None => return ApplyOutcome::Ignored(IgnoreReason::NoActiveRun),
            Some(live) if live != run => return ApplyOutcome::Ignored(IgnoreReason::StaleRun),
            Some(_) => {}
        }
        if self.state.is_frozen() {
            return ApplyOutcome::Ignored(IgnoreReason::Frozen);
        }

        match event {
            TraceEvent::Status(status) => self.on_status(status),
            TraceEvent::Visited(edge) => self.on_visited(edge),
            TraceEvent::Path(path) => self.on_path(path),
            TraceEvent::Progress { explored } => {
                if let Some(explored) = explored {
                    self.state.explored_count = explored;
                }
                ApplyOutcome::Updated
            }
            TraceEvent::Done(done) => self.on_done(done),
            TraceEvent::Error { msg } => {
                let message = msg.unwrap_or_else(|| "run failed".to_string());
                self.state.outcome = RunOutcome::Failed {
                    message: message.clone(),
                };
                ApplyOutcome::Failed(message)
            }
        }
    }

    fn on_status(&mut self, status: StatusEvent) -> ApplyOutcome {
        if self.state.status_algorithm.is_none() {
            self.state.status_algorithm = status.algorithm;
        }
        if status.msg.is_some() {
            self.state.last_status = status.msg;
        }
        ApplyOutcome::Updated
    }

    fn on_visited(&mut self, edge: EdgeEvent) -> ApplyOutcome {
        let Some(id) = edge.edge_id() else {
            return ApplyOutcome::Ignored(IgnoreReason::MissingEdgeId);
        };
        self.remember_geometry(&id, edge.coords);
        self.state.record_visited(id);
        ApplyOutcome::Updated
    }

    fn on_path(&mut self, path: PathEvent) -> ApplyOutcome {
        let Some(id) = path.edge_id() else {
            return ApplyOutcome::Ignored(IgnoreReason::MissingEdgeId);
        };
        let order = path.order();
        self.remember_geometry(&id, path.coords);
        self.state.record_path(id, order);
        ApplyOutcome::Updated
    }

    fn on_done(&mut self, done: DoneEvent) -> ApplyOutcome {
        let Some(request) = self.state.request() else {
            return ApplyOutcome::Ignored(IgnoreReason::NoActiveRun);
        };
        let summary = RunSummary::from_done(request, &done);
        if let Some(explored) = done.nodes_explored {
            self.state.explored_count = explored;
        }
        self.state.outcome = RunOutcome::Completed {
            summary: summary.clone(),
        };
        ApplyOutcome::Completed(summary)
    }

    fn remember_geometry(&self, id: &EdgeId, coords: Option<Polyline>) {
        if let Some(coords) = coords {
            if !self.cache.contains(id) {
                self.cache.insert_if_absent(id.clone(), coords);
            }
        }
    }
}
