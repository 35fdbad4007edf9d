//! Connection manager lifecycle against the in-process transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use routewatch_core_types::{
    Algorithm, ConnectionState, DoneEvent, EdgeEvent, EdgeId, NodeId, RunId, RunParams,
    RunRequest, TraceEvent,
};
use tokio::time::{sleep, timeout};
use trace_link::{
    ChannelListener, ChannelTransport, ConnectionManager, FrameSink, LinkConfig, LinkErrorKind,
    ProtocolFault, ServerEnd, TraceFault, TransportFault,
};

fn fast_config() -> LinkConfig {
    LinkConfig {
        retry_base_ms: 20,
        retry_max_ms: 60,
        clean_reconnect_ms: 10,
        send_timeout_ms: 300,
        connect_timeout_ms: 200,
        ..LinkConfig::default()
    }
}

fn request(dest: u64) -> RunRequest {
    RunRequest::new(
        Algorithm::Dijkstra,
        NodeId(1),
        NodeId(dest),
        RunParams::default(),
    )
    .unwrap()
}

fn visited(u: u64, v: u64) -> TraceEvent {
    TraceEvent::Visited(EdgeEvent {
        edge_id: Some(EdgeId::from_endpoints(NodeId(u), NodeId(v), 0)),
        ..EdgeEvent::default()
    })
}

#[derive(Default)]
struct RecordingSink {
    runs: Mutex<Vec<RunId>>,
    events: Mutex<Vec<(RunId, TraceEvent)>>,
}

impl RecordingSink {
    fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl FrameSink for RecordingSink {
    fn begin_run(&self, run: RunId, _request: &RunRequest) {
        self.runs.lock().push(run);
    }

    fn deliver(&self, run: RunId, event: TraceEvent) {
        self.events.lock().push((run, event));
    }
}

struct Harness {
    manager: Arc<ConnectionManager>,
    transport: Arc<ChannelTransport>,
    listener: ChannelListener,
    sink: Arc<RecordingSink>,
}

fn harness(config: LinkConfig) -> Harness {
    let (transport, listener) = ChannelTransport::new();
    let sink = Arc::new(RecordingSink::default());
    let manager = ConnectionManager::spawn(&config, transport.clone(), sink.clone());
    Harness {
        manager: Arc::new(manager),
        transport,
        listener,
        sink,
    }
}

async fn accept(listener: &mut ChannelListener) -> ServerEnd {
    timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("no connection accepted in time")
        .expect("transport dropped")
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn send_opens_link_and_tags_events_with_run() {
    let mut h = harness(fast_config());
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    let run = h.manager.send(request(2)).await.expect("request sent");
    assert_eq!(h.manager.state(), ConnectionState::Open);

    let mut server = accept(&mut h.listener).await;
    let received = server.next_request().await.expect("request on the wire");
    assert_eq!(received.destination(), NodeId(2));

    assert!(server.emit(&visited(1, 5)));
    assert!(server.emit(&visited(5, 2)));
    eventually("two events", || h.sink.event_count() == 2).await;

    let events = h.sink.events.lock().clone();
    assert!(events.iter().all(|(tagged, _)| *tagged == run));
    assert_eq!(events[0].1, visited(1, 5));
    assert_eq!(events[1].1, visited(5, 2));
    assert_eq!(h.sink.runs.lock().as_slice(), &[run]);
}

#[tokio::test]
async fn queued_request_is_sent_once_link_opens() {
    let mut h = harness(fast_config());
    h.transport.set_reachable(false);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.send(request(9)).await });

    eventually("a failed attempt", || h.transport.connect_attempts() >= 1).await;
    assert_ne!(h.manager.state(), ConnectionState::Open);
    h.transport.set_reachable(true);

    let run = pending.await.unwrap().expect("queued request flushed");
    let mut server = accept(&mut h.listener).await;
    assert_eq!(server.next_request().await.unwrap().destination(), NodeId(9));
    assert_eq!(h.sink.runs.lock().as_slice(), &[run]);
}

#[tokio::test]
async fn newer_request_supersedes_queued_one() {
    let mut h = harness(fast_config());
    h.transport.set_reachable(false);

    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.send(request(3)).await })
    };
    eventually("a failed attempt", || h.transport.connect_attempts() >= 1).await;
    let second = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.send(request(4)).await })
    };

    let err = first.await.unwrap().unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::Superseded);

    h.transport.set_reachable(true);
    second.await.unwrap().expect("newest request sent");
    let mut server = accept(&mut h.listener).await;
    assert_eq!(server.next_request().await.unwrap().destination(), NodeId(4));
}

#[tokio::test]
async fn request_times_out_when_link_never_opens() {
    let h = harness(fast_config());
    h.transport.set_reachable(false);

    let started = Instant::now();
    let err = h.manager.send(request(2)).await.unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::DeliveryTimeout);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let faults = h.manager.faults().snapshot();
    assert!(faults.iter().any(|record| matches!(
        record.fault,
        TraceFault::Transport(TransportFault::DeliveryTimeout { timeout_ms: 300 })
    )));
    assert!(faults.iter().any(|record| matches!(
        record.fault,
        TraceFault::Transport(TransportFault::ConnectFailed { .. })
    )));

    // Reconnection keeps going after the request gave up.
    let attempts = h.transport.connect_attempts();
    eventually("another attempt", || h.transport.connect_attempts() > attempts).await;
}

#[tokio::test]
async fn retry_spacing_grows_linearly_then_caps() {
    let h = harness(fast_config());
    h.transport.set_reachable(false);
    h.manager.open().await.unwrap();

    eventually("six attempts", || h.transport.connect_attempts() >= 6).await;
    h.manager.close(true).await.unwrap();

    let times = h.transport.attempt_times();
    let gaps: Vec<Duration> = times.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let floors = [20u64, 40, 60, 60, 60];
    for (gap, floor) in gaps.iter().zip(floors) {
        assert!(
            *gap >= Duration::from_millis(floor),
            "gap {gap:?} shorter than {floor} ms in {gaps:?}"
        );
    }
}

#[tokio::test]
async fn intentional_close_stops_retries_and_fails_pending_request() {
    let h = harness(fast_config());
    h.transport.set_reachable(false);

    let pending = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.send(request(2)).await })
    };
    eventually("a failed attempt", || h.transport.connect_attempts() >= 1).await;

    h.manager.close(true).await.unwrap();
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::Cancelled);

    let attempts = h.transport.connect_attempts();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.transport.connect_attempts(), attempts);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn no_events_after_intentional_close() {
    let mut h = harness(fast_config());
    h.manager.send(request(2)).await.unwrap();
    let mut server = accept(&mut h.listener).await;
    server.next_request().await.unwrap();
    server.emit(&visited(1, 2));
    eventually("first event", || h.sink.event_count() == 1).await;

    h.manager.close(true).await.unwrap();
    server.emit(&visited(2, 3));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(h.sink.event_count(), 1);
    assert!(server.next_raw().await.is_none());
    assert_eq!(h.transport.connect_attempts(), 1);
}

#[tokio::test]
async fn explicit_open_rearms_after_intentional_close() {
    let mut h = harness(fast_config());
    h.manager.open().await.unwrap();
    let _first = accept(&mut h.listener).await;
    h.manager
        .wait_for_state(ConnectionState::Open, Duration::from_secs(1))
        .await
        .unwrap();

    h.manager.close(true).await.unwrap();
    h.manager.open().await.unwrap();
    let _second = accept(&mut h.listener).await;
    h.manager
        .wait_for_state(ConnectionState::Open, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(h.transport.connect_attempts(), 2);
}

#[tokio::test]
async fn clean_server_close_reconnects_without_fault() {
    let mut h = harness(fast_config());
    h.manager.send(request(2)).await.unwrap();
    let server = accept(&mut h.listener).await;
    server.close(true);

    let _again = accept(&mut h.listener).await;
    h.manager
        .wait_for_state(ConnectionState::Open, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(h.manager.faults().counts().transport, 0);
}

#[tokio::test]
async fn unclean_drop_is_recorded_and_reconnects() {
    let mut h = harness(fast_config());
    h.manager.open().await.unwrap();
    let server = accept(&mut h.listener).await;
    drop(server);

    let _again = accept(&mut h.listener).await;
    let faults = h.manager.faults().snapshot();
    assert!(faults.iter().any(|record| matches!(
        record.fault,
        TraceFault::Transport(TransportFault::UncleanClose { .. })
    )));
}

#[tokio::test]
async fn malformed_frames_go_to_fault_log() {
    let mut h = harness(fast_config());
    h.manager.send(request(2)).await.unwrap();
    let mut server = accept(&mut h.listener).await;
    server.next_request().await.unwrap();

    server.emit_raw("{not json");
    server.emit_raw(r#"{"type":"teleport","to":7}"#);
    server.emit_raw(r#"[1,2,3]"#);
    server.emit(&visited(1, 2));
    eventually("valid event", || h.sink.event_count() == 1).await;

    let counts = h.manager.faults().counts();
    assert_eq!(counts.malformed_frames, 3);
    assert_eq!(counts.protocol, 3);
    assert_eq!(h.manager.state(), ConnectionState::Open);
}

#[tokio::test]
async fn events_without_a_request_are_protocol_faults() {
    let mut h = harness(fast_config());
    h.manager.open().await.unwrap();
    let server = accept(&mut h.listener).await;
    server.emit(&visited(1, 2));

    let faults = h.manager.faults();
    eventually("protocol fault", || faults.counts().protocol == 1).await;
    assert!(matches!(
        faults.latest().map(|record| record.fault),
        Some(TraceFault::Protocol(ProtocolFault::NoActiveRun { event })) if event == "visited"
    ));
    assert_eq!(h.sink.event_count(), 0);
}

#[tokio::test]
async fn shutdown_stops_the_driver() {
    let h = harness(fast_config());
    h.manager.open().await.unwrap();
    h.manager.shutdown().await;
    let err = h.manager.open().await.unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::Closed);
}

#[tokio::test]
async fn request_lost_to_a_closing_connection_is_sent_again() {
    let mut h = harness(fast_config());
    let run = h.manager.send(request(4)).await.unwrap();

    let mut closing = accept(&mut h.listener).await;
    assert_eq!(closing.next_request().await.unwrap().destination(), NodeId(4));
    closing.close(true);

    let mut server = accept(&mut h.listener).await;
    let resent = timeout(Duration::from_secs(1), server.next_request())
        .await
        .expect("request sent again")
        .unwrap();
    assert_eq!(resent.destination(), NodeId(4));

    assert!(server.emit(&visited(1, 4)));
    eventually("event on the new connection", || h.sink.event_count() == 1).await;
    assert_eq!(h.sink.events.lock()[0].0, run);
    assert_eq!(h.sink.runs.lock().as_slice(), &[run]);
    assert_eq!(h.manager.faults().counts().transport, 0);
}

#[tokio::test]
async fn finished_connection_is_replaced_for_the_next_request() {
    let mut h = harness(fast_config());
    h.manager.send(request(2)).await.unwrap();
    let mut first = accept(&mut h.listener).await;
    first.next_request().await.unwrap();
    assert!(first.emit(&TraceEvent::Done(DoneEvent::default())));
    eventually("done delivered", || h.sink.event_count() == 1).await;

    let second = h.manager.send(request(3)).await.unwrap();
    let mut server = accept(&mut h.listener).await;
    let received = timeout(Duration::from_secs(1), server.next_request())
        .await
        .expect("request on a fresh connection")
        .unwrap();
    assert_eq!(received.destination(), NodeId(3));
    assert!(first.is_closed());
    assert_eq!(h.transport.connect_attempts(), 2);

    assert!(server.emit(&visited(1, 3)));
    eventually("event for the second run", || h.sink.event_count() == 2).await;
    assert_eq!(h.sink.events.lock()[1].0, second);
}
