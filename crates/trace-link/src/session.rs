//! Session facade: one connection manager feeding one accumulator, with the
//! geometry cache and stats registry shared for the session's lifetime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use routewatch_core_types::{
    ComparisonResult, ConnectionState, RunId, RunRequest, RunSummary, TraceEvent,
};
use routewatch_event_bus::{EventBus, InMemoryBus};
use routewatch_run_stats::StatsRegistry;
use routewatch_trace_state::{
    ApplyOutcome, EdgeCoordinateCache, IgnoreReason, RunOutcome, TraceAccumulator, TraceSnapshot,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkErrorKind};
use crate::fault::{FaultLog, ProtocolFault, TraceFault};
use crate::graph_api::GraphApi;
use crate::manager::{ConnectionManager, FrameSink};
use crate::transport::{TraceTransport, WsTransport};

/// Notices broadcast to observers of a session.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SessionNotice {
    StateChanged { state: ConnectionState },
    RunStarted { run: RunId, request: RunRequest },
    RunCompleted { run: RunId, summary: RunSummary },
    RunFailed { run: RunId, message: String },
    Comparison { comparison: ComparisonResult },
    Fault { fault: TraceFault },
}

/// Terminal outcome of a run, published once per run.
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalRun {
    pub run: RunId,
    pub outcome: RunOutcome,
}

/// Receives frames from the driver and keeps trace state, cache and stats
/// consistent with them.
pub struct TraceHub {
    accumulator: Mutex<TraceAccumulator>,
    cache: Arc<EdgeCoordinateCache>,
    stats: Arc<StatsRegistry>,
    faults: Arc<FaultLog>,
    notices: Arc<InMemoryBus<SessionNotice>>,
    outcomes: watch::Sender<Option<TerminalRun>>,
}

impl TraceHub {
    pub fn new(
        cache: Arc<EdgeCoordinateCache>,
        stats: Arc<StatsRegistry>,
        faults: Arc<FaultLog>,
        notice_capacity: usize,
    ) -> Self {
        let (outcomes, _) = watch::channel(None);
        Self {
            accumulator: Mutex::new(TraceAccumulator::new(Arc::clone(&cache))),
            cache,
            stats,
            faults,
            notices: InMemoryBus::new(notice_capacity),
            outcomes,
        }
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        self.accumulator.lock().state().snapshot()
    }

    /// Drop the marks of the current run. Geometry and stats are kept.
    pub fn clear(&self) {
        self.accumulator.lock().clear();
    }

    pub fn cache(&self) -> Arc<EdgeCoordinateCache> {
        Arc::clone(&self.cache)
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn watch_outcomes(&self) -> watch::Receiver<Option<TerminalRun>> {
        self.outcomes.subscribe()
    }

    fn finish(&self, run: RunId, outcome: RunOutcome) {
        self.outcomes.send_replace(Some(TerminalRun { run, outcome }));
    }
}

impl FrameSink for TraceHub {
    fn begin_run(&self, run: RunId, request: &RunRequest) {
        self.accumulator.lock().begin_run(run, request.clone());
        self.notices.notify(SessionNotice::RunStarted {
            run,
            request: request.clone(),
        });
    }

    fn deliver(&self, run: RunId, event: TraceEvent) {
        let kind = event.kind();
        let outcome = self.accumulator.lock().apply(run, event);
        match outcome {
            ApplyOutcome::Updated => {}
            ApplyOutcome::Ignored(IgnoreReason::NoActiveRun) => {
                warn!(target: "trace-link", %run, kind, "event after the trace was cleared");
                let record = self.faults.record(ProtocolFault::NoActiveRun {
                    event: kind.to_string(),
                });
                self.fault(&record.fault);
            }
            ApplyOutcome::Ignored(reason) => {
                debug!(target: "trace-link", %run, ?reason, "event ignored");
            }
            ApplyOutcome::Completed(summary) => {
                info!(
                    target: "trace-link",
                    %run,
                    algorithm = %summary.algorithm,
                    explored = summary.explored_count,
                    elapsed_s = summary.elapsed_seconds,
                    distance_km = summary.distance_km,
                    "run completed"
                );
                self.stats.record(summary.clone());
                if let Some(comparison) = self.stats.compare(summary.origin, summary.destination)
                {
                    self.notices
                        .notify(SessionNotice::Comparison { comparison });
                }
                self.notices.notify(SessionNotice::RunCompleted {
                    run,
                    summary: summary.clone(),
                });
                self.finish(run, RunOutcome::Completed { summary });
            }
            ApplyOutcome::Failed(message) => {
                warn!(target: "trace-link", %run, %message, "run failed");
                self.notices.notify(SessionNotice::RunFailed {
                    run,
                    message: message.clone(),
                });
                self.finish(run, RunOutcome::Failed { message });
            }
        }
    }

    fn state_changed(&self, state: ConnectionState) {
        self.notices.notify(SessionNotice::StateChanged { state });
    }

    fn fault(&self, fault: &TraceFault) {
        self.notices.notify(SessionNotice::Fault {
            fault: fault.clone(),
        });
    }
}

/// What a front end holds: start runs, read the live trace, read stats.
pub struct TraceSession {
    config: LinkConfig,
    hub: Arc<TraceHub>,
    manager: ConnectionManager,
}

impl TraceSession {
    /// Session over the websocket endpoint derived from `config`.
    pub fn connect(config: LinkConfig) -> Result<Self, LinkError> {
        let url = config.stream_url()?;
        Ok(Self::with_transport(config, Arc::new(WsTransport::new(url))))
    }

    pub fn with_transport(config: LinkConfig, transport: Arc<dyn TraceTransport>) -> Self {
        Self::with_parts(
            config,
            transport,
            Arc::new(EdgeCoordinateCache::new()),
            Arc::new(StatsRegistry::new()),
        )
    }

    pub fn with_parts(
        config: LinkConfig,
        transport: Arc<dyn TraceTransport>,
        cache: Arc<EdgeCoordinateCache>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let faults = Arc::new(FaultLog::new());
        let hub = Arc::new(TraceHub::new(
            cache,
            stats,
            Arc::clone(&faults),
            config.notice_capacity,
        ));
        let sink: Arc<dyn FrameSink> = hub.clone();
        let manager = ConnectionManager::spawn_with_faults(&config, transport, sink, faults);
        Self {
            config,
            hub,
            manager,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub async fn open(&self) -> Result<(), LinkError> {
        self.manager.open().await
    }

    /// Reset the trace and send `request`. Events of an earlier run that are
    /// still in flight are ignored.
    pub async fn start(&self, request: RunRequest) -> Result<RunId, LinkError> {
        self.hub.clear();
        self.manager.send(request).await
    }

    pub fn clear(&self) {
        self.hub.clear();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        self.manager.wait_for_state(target, timeout).await
    }

    pub fn trace(&self) -> TraceSnapshot {
        self.hub.snapshot()
    }

    pub fn latest_summary(&self) -> Option<RunSummary> {
        self.hub.stats.latest()
    }

    pub fn latest_comparison(&self) -> Option<ComparisonResult> {
        self.hub.stats.latest_comparison()
    }

    pub fn faults(&self) -> Arc<FaultLog> {
        self.manager.faults()
    }

    pub fn cache(&self) -> Arc<EdgeCoordinateCache> {
        self.hub.cache()
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.hub.stats()
    }

    pub fn hub(&self) -> Arc<TraceHub> {
        Arc::clone(&self.hub)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.hub.subscribe()
    }

    /// Wait until `run` completes or fails.
    pub async fn wait_for_outcome(
        &self,
        run: RunId,
        timeout: Duration,
    ) -> Result<RunOutcome, LinkError> {
        let mut outcomes = self.hub.watch_outcomes();
        let wait = async {
            loop {
                let finished = outcomes
                    .borrow_and_update()
                    .as_ref()
                    .filter(|terminal| terminal.run == run)
                    .map(|terminal| terminal.outcome.clone());
                if let Some(outcome) = finished {
                    return Ok(outcome);
                }
                if outcomes.changed().await.is_err() {
                    return Err(LinkError::driver_gone());
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            LinkError::new(LinkErrorKind::RunTimeout)
                .with_hint(format!("run {run} still streaming after {timeout:?}"))
        })?
    }

    /// Merge the bulk edge sample into the geometry cache.
    pub async fn seed_cache(&self, api: &GraphApi, decimate: u32) -> Result<usize, LinkError> {
        let edges = api.edges_sample(decimate).await?;
        let total = edges.len();
        let added = self.hub.cache.merge(edges);
        info!(target: "trace-link", total, added, "edge sample merged");
        Ok(added)
    }

    pub async fn close(&self, intentional: bool) -> Result<(), LinkError> {
        self.manager.close(intentional).await
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
