//! End-to-end runs through `TraceSession` with a scripted server.

use std::sync::Arc;
use std::time::Duration;

use routewatch_core_types::{
    Algorithm, ConnectionState, DoneEvent, EdgeEvent, EdgeId, LatLon, NodeId, PathEvent,
    RunParams, RunRequest, StatusEvent, TraceEvent,
};
use routewatch_trace_state::RunOutcome;
use tokio::time::timeout;
use trace_link::{
    ChannelListener, ChannelTransport, LinkConfig, ProtocolFault, ServerEnd, SessionNotice,
    TraceFault, TraceSession,
};

const WAIT: Duration = Duration::from_secs(2);

fn session() -> (TraceSession, Arc<ChannelTransport>, ChannelListener) {
    let (transport, listener) = ChannelTransport::new();
    let config = LinkConfig {
        retry_base_ms: 20,
        retry_max_ms: 60,
        clean_reconnect_ms: 10,
        send_timeout_ms: 500,
        ..LinkConfig::default()
    };
    let session = TraceSession::with_transport(config, transport.clone());
    (session, transport, listener)
}

fn request(algorithm: Algorithm) -> RunRequest {
    RunRequest::new(algorithm, NodeId(10), NodeId(40), RunParams::new(5, 2.0).unwrap()).unwrap()
}

async fn accept(listener: &mut ChannelListener) -> ServerEnd {
    timeout(WAIT, listener.accept())
        .await
        .expect("no connection accepted in time")
        .expect("transport dropped")
}

fn edge(u: u64, v: u64) -> EdgeId {
    EdgeId::from_endpoints(NodeId(u), NodeId(v), 0)
}

fn segment(u: u64, v: u64) -> Vec<LatLon> {
    let base = -27.47 - (u as f64) * 0.001;
    vec![LatLon(base, -58.83), LatLon(base - 0.001, -58.831 - (v as f64) * 0.0001)]
}

/// Status, three visited edges, a path delivered out of order, then done.
fn serve_run(server: &ServerEnd, algorithm: Algorithm, explored: u64) {
    server.emit(&TraceEvent::Status(StatusEvent {
        msg: Some("running".into()),
        algorithm: Some(algorithm),
        orig: Some(NodeId(10)),
        dest: Some(NodeId(40)),
        node: None,
    }));
    for (u, v) in [(10, 20), (20, 30), (30, 40)] {
        server.emit(&TraceEvent::Visited(EdgeEvent {
            edge_id: Some(edge(u, v)),
            u: Some(NodeId(u)),
            v: Some(NodeId(v)),
            k: Some(0),
            weight: Some(120.5),
            coords: Some(segment(u, v)),
        }));
    }
    server.emit(&TraceEvent::Progress {
        explored: Some(explored / 2),
    });
    for (u, v, order) in [(30, 40, 2), (10, 20, 0), (20, 30, 1)] {
        server.emit(&TraceEvent::Path(PathEvent {
            edge_id: Some(edge(u, v)),
            order: Some(order),
            coords: Some(segment(u, v)),
            ..PathEvent::default()
        }));
    }
    server.emit(&TraceEvent::Done(DoneEvent {
        nodes_explored: Some(explored),
        time_s: Some(0.012),
        distance_km: Some(1.4),
    }));
}

#[tokio::test]
async fn streamed_run_builds_trace_and_summary() {
    let (session, _transport, mut listener) = session();
    let run = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut server = accept(&mut listener).await;
    let received = server.next_request().await.unwrap();
    assert_eq!(received.params().decimate, 5);

    serve_run(&server, Algorithm::Dijkstra, 80);
    let outcome = session.wait_for_outcome(run, WAIT).await.unwrap();
    let RunOutcome::Completed { summary } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.explored_count, 80);
    assert_eq!(summary.distance_km, 1.4);

    let trace = session.trace();
    assert_eq!(trace.run, Some(run));
    assert_eq!(trace.visited, vec![edge(10, 20), edge(20, 30), edge(30, 40)]);
    assert_eq!(trace.path, vec![edge(10, 20), edge(20, 30), edge(30, 40)]);
    assert_eq!(trace.explored_count, 80);
    assert_eq!(trace.last_status.as_deref(), Some("running"));

    assert_eq!(session.cache().len(), 3);
    assert_eq!(session.latest_summary(), Some(summary));
    assert!(session.latest_comparison().is_none());
}

#[tokio::test]
async fn comparison_ready_after_both_algorithms() {
    let (session, _transport, mut listener) = session();

    let first = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut server = accept(&mut listener).await;
    server.next_request().await.unwrap();
    serve_run(&server, Algorithm::Dijkstra, 90);
    session.wait_for_outcome(first, WAIT).await.unwrap();

    let second = session.start(request(Algorithm::AStar)).await.unwrap();
    assert!(session.trace().visited.is_empty());
    let mut server = accept(&mut listener).await;
    let next = server.next_request().await.unwrap();
    assert_eq!(next.algorithm(), Algorithm::AStar);
    serve_run(&server, Algorithm::AStar, 30);
    session.wait_for_outcome(second, WAIT).await.unwrap();

    let comparison = session.latest_comparison().expect("both algorithms ran");
    assert_eq!(comparison.dijkstra.explored_count, 90);
    assert_eq!(comparison.astar.explored_count, 30);
    assert_eq!(comparison.exploration_ratio(), Some(3.0));
    assert_eq!(session.stats().len(), 2);
}

#[tokio::test]
async fn server_error_fails_run_and_freezes_trace() {
    let (session, _transport, mut listener) = session();
    let run = session.start(request(Algorithm::AStar)).await.unwrap();
    let mut server = accept(&mut listener).await;
    server.next_request().await.unwrap();

    server.emit(&TraceEvent::Visited(EdgeEvent {
        edge_id: Some(edge(10, 20)),
        ..EdgeEvent::default()
    }));
    server.emit(&TraceEvent::Error {
        msg: Some("origin or destination not in graph".into()),
    });
    server.emit(&TraceEvent::Visited(EdgeEvent {
        edge_id: Some(edge(20, 30)),
        ..EdgeEvent::default()
    }));

    let outcome = session.wait_for_outcome(run, WAIT).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            message: "origin or destination not in graph".into()
        }
    );
    // Give the trailing frame time to arrive; it must be ignored.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.trace().visited, vec![edge(10, 20)]);
    assert!(session.latest_summary().is_none());
}

#[tokio::test]
async fn notices_follow_the_run() {
    let (session, _transport, mut listener) = session();
    let mut notices = session.subscribe();

    let run = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut server = accept(&mut listener).await;
    server.next_request().await.unwrap();
    server.emit_raw("not a frame");
    serve_run(&server, Algorithm::Dijkstra, 12);

    let mut saw_open = false;
    let mut saw_start = false;
    let mut saw_fault = false;
    loop {
        let notice = timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        match notice {
            SessionNotice::StateChanged {
                state: ConnectionState::Open,
            } => saw_open = true,
            SessionNotice::RunStarted { run: started, .. } => saw_start = started == run,
            SessionNotice::Fault { .. } => saw_fault = true,
            SessionNotice::RunCompleted { run: done, summary } => {
                assert_eq!(done, run);
                assert_eq!(summary.explored_count, 12);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_open && saw_start && saw_fault);
    assert_eq!(session.faults().counts().malformed_frames, 1);
}

#[tokio::test]
async fn cache_outlives_clear_and_runs() {
    let (session, _transport, mut listener) = session();
    let run = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut server = accept(&mut listener).await;
    server.next_request().await.unwrap();
    serve_run(&server, Algorithm::Dijkstra, 5);
    session.wait_for_outcome(run, WAIT).await.unwrap();

    session.clear();
    let trace = session.trace();
    assert!(trace.run.is_none());
    assert!(trace.visited.is_empty());
    assert_eq!(session.cache().len(), 3);
    assert_eq!(*session.cache().lookup(&edge(10, 20)).unwrap(), segment(10, 20));

    session.shutdown().await;
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn next_run_after_done_goes_out_on_a_fresh_connection() {
    let (session, transport, mut listener) = session();
    let first = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut finished = accept(&mut listener).await;
    finished.next_request().await.unwrap();
    serve_run(&finished, Algorithm::Dijkstra, 40);
    session.wait_for_outcome(first, WAIT).await.unwrap();

    // The server closes after every run; the close may trail the next start.
    let second = session.start(request(Algorithm::AStar)).await.unwrap();
    finished.close(true);

    let mut server = accept(&mut listener).await;
    let resent = timeout(WAIT, server.next_request())
        .await
        .expect("request on the new connection")
        .unwrap();
    assert_eq!(resent.algorithm(), Algorithm::AStar);
    serve_run(&server, Algorithm::AStar, 15);

    let outcome = session.wait_for_outcome(second, WAIT).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(session.faults().counts().transport, 0);
    assert!(session.latest_comparison().is_some());
}

#[tokio::test]
async fn events_after_clear_are_protocol_faults() {
    let (session, _transport, mut listener) = session();
    let run = session.start(request(Algorithm::Dijkstra)).await.unwrap();
    let mut server = accept(&mut listener).await;
    server.next_request().await.unwrap();
    serve_run(&server, Algorithm::Dijkstra, 8);
    session.wait_for_outcome(run, WAIT).await.unwrap();

    session.clear();
    server.emit(&TraceEvent::Progress { explored: Some(9) });

    let faults = session.faults();
    let deadline = tokio::time::Instant::now() + WAIT;
    while faults.counts().protocol == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no fault recorded");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        faults.latest().map(|record| record.fault),
        Some(TraceFault::Protocol(ProtocolFault::NoActiveRun { event })) if event == "progress"
    ));
    assert!(session.trace().run.is_none());
}
