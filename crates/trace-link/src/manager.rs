//! Connection driver.
//!
//! A single task owns the connection, the pending request, the retry timer
//! and the send deadline. Callers talk to it through [`ConnectionManager`],
//! so every lifecycle change is serialized and runs through
//! [`LinkMachine`](crate::fsm::LinkMachine).

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use routewatch_core_types::{ConnectionState, RunId, RunRequest, TraceEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkErrorKind};
use crate::fault::{FaultLog, ProtocolFault, TraceFault, TransportFault};
use crate::fsm::{LinkAction, LinkInput, LinkMachine};
use crate::metrics;
use crate::transport::{InboundFrame, TraceConnection, TraceTransport};

const COMMAND_BUFFER: usize = 64;

/// Receiver of decoded events. Called from the driver task, in arrival order.
pub trait FrameSink: Send + Sync {
    /// A request for `run` was written to the wire.
    fn begin_run(&self, run: RunId, request: &RunRequest);

    fn deliver(&self, run: RunId, event: TraceEvent);

    fn state_changed(&self, _state: ConnectionState) {}

    fn fault(&self, _fault: &TraceFault) {}
}

enum Command {
    Open,
    Send {
        request: RunRequest,
        reply: oneshot::Sender<Result<RunId, LinkError>>,
    },
    Close {
        intentional: bool,
        ack: oneshot::Sender<()>,
    },
}

struct PendingSend {
    request: RunRequest,
    /// `None` when the driver re-sends a request on its own.
    reply: Option<oneshot::Sender<Result<RunId, LinkError>>>,
    /// Run the request already belongs to, when it is a re-send.
    run: Option<RunId>,
}

impl PendingSend {
    fn fail(self, err: LinkError) {
        if let Some(reply) = self.reply {
            let _ = reply.send(Err(err));
        }
    }
}

/// A request on the wire whose run has not produced a frame yet.
struct InFlight {
    run: RunId,
    request: RunRequest,
}

type ConnectFuture = BoxFuture<'static, Result<Box<dyn TraceConnection>, LinkError>>;

/// Handle to the connection driver task.
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    faults: Arc<FaultLog>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawn the driver on the current tokio runtime. The link starts `Idle`.
    pub fn spawn(
        config: &LinkConfig,
        transport: Arc<dyn TraceTransport>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self::spawn_with_faults(config, transport, sink, Arc::new(FaultLog::new()))
    }

    pub fn spawn_with_faults(
        config: &LinkConfig,
        transport: Arc<dyn TraceTransport>,
        sink: Arc<dyn FrameSink>,
        faults: Arc<FaultLog>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let cancel = CancellationToken::new();
        let driver = LinkDriver {
            machine: LinkMachine::new(config.retry_policy()),
            transport,
            sink,
            faults: Arc::clone(&faults),
            state_tx,
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
            connecting: None,
            connection: None,
            retry_timer: None,
            send_deadline: None,
            pending: None,
            in_flight: None,
            spent: false,
            active_run: None,
        };
        let task = tokio::spawn(driver.run(command_rx, cancel.clone()));
        Self {
            commands: command_tx,
            state: state_rx,
            faults,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Start connecting unless a connection is open or in progress. Also
    /// re-arms reconnection after an intentional close.
    pub async fn open(&self) -> Result<(), LinkError> {
        self.dispatch(Command::Open).await
    }

    /// Send a run request. Resolves once the request is on the wire, or fails
    /// with `DeliveryTimeout` when the link is not open in time, `Superseded`
    /// when a newer request replaced it, or `Cancelled` on intentional close.
    pub async fn send(&self, request: RunRequest) -> Result<RunId, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Send { request, reply }).await?;
        rx.await.map_err(|_| LinkError::driver_gone())?
    }

    /// Close the connection. An intentional close stops every retry and no
    /// events are delivered after this returns. A non-intentional close
    /// drops the connection and lets the retry policy reconnect.
    pub async fn close(&self, intentional: bool) -> Result<(), LinkError> {
        let (ack, rx) = oneshot::channel();
        self.dispatch(Command::Close { intentional, ack }).await?;
        rx.await.map_err(|_| LinkError::driver_gone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the link reports `target`. Transient states may be missed.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        let mut rx = self.state.clone();
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|state| *state == target).await.map(|_| ())
        })
        .await;
        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LinkError::driver_gone()),
            Err(_) => Err(LinkError::new(LinkErrorKind::Internal)
                .with_hint(format!("link did not reach {target} within {timeout:?}"))),
        }
    }

    pub fn faults(&self) -> Arc<FaultLog> {
        Arc::clone(&self.faults)
    }

    /// Close intentionally, stop the driver and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.close(true).await;
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(target: "trace-link", ?err, "connection driver panicked");
                }
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::driver_gone())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct LinkDriver {
    machine: LinkMachine,
    transport: Arc<dyn TraceTransport>,
    sink: Arc<dyn FrameSink>,
    faults: Arc<FaultLog>,
    state_tx: watch::Sender<ConnectionState>,
    connect_timeout: Duration,
    send_timeout: Duration,
    connecting: Option<ConnectFuture>,
    connection: Option<Box<dyn TraceConnection>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    send_deadline: Option<Pin<Box<Sleep>>>,
    pending: Option<PendingSend>,
    in_flight: Option<InFlight>,
    /// The open connection already carried a run to its end. The server
    /// closes after one run, so the next request goes out on a fresh one.
    spent: bool,
    /// Run that streamed events belong to. Survives reconnects; replaced by
    /// the next successful send.
    active_run: Option<RunId>,
}

impl LinkDriver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                frame = next_frame(&mut self.connection) => self.on_frame(frame).await,
                outcome = poll_slot(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_outcome(outcome).await;
                }
                _ = poll_slot(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.apply(LinkInput::RetryElapsed).await;
                }
                _ = poll_slot(&mut self.send_deadline) => {
                    self.send_deadline = None;
                    self.on_send_timeout();
                }
            }
        }
        self.teardown().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Open => self.apply(LinkInput::OpenRequested).await,
            Command::Send { request, reply } => {
                self.on_send(PendingSend {
                    request,
                    reply: Some(reply),
                    run: None,
                })
                .await
            }
            Command::Close { intentional, ack } => {
                if intentional {
                    self.in_flight = None;
                    self.active_run = None;
                }
                self.apply(LinkInput::CloseRequested { intentional }).await;
                let _ = ack.send(());
            }
        }
    }

    async fn on_send(&mut self, send: PendingSend) {
        if self.machine.state() == ConnectionState::Open && self.connection.is_some() {
            if !self.spent {
                if let Some(follow_up) = self.transmit(send).await {
                    self.apply(follow_up).await;
                }
                return;
            }
            self.retire_spent_connection().await;
        }
        if let Some(previous) = self.pending.replace(send) {
            debug!(target: "trace-link", "queued request superseded");
            previous.fail(LinkError::new(LinkErrorKind::Superseded));
        }
        self.send_deadline = Some(Box::pin(sleep(self.send_timeout)));
        self.apply(LinkInput::OpenRequested).await;
    }

    /// Close a connection whose run has finished, as the server would.
    async fn retire_spent_connection(&mut self) {
        debug!(target: "trace-link", "connection finished its run; reconnecting");
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.apply(LinkInput::Dropped { clean: true }).await;
    }

    /// Queue the request of a run that never streamed again after its
    /// connection went away. A newer queued request wins.
    fn requeue_in_flight(&mut self) {
        let Some(InFlight { run, request }) = self.in_flight.take() else {
            return;
        };
        if self.pending.is_some() {
            return;
        }
        warn!(target: "trace-link", %run, "connection closed before the run streamed; request requeued");
        self.pending = Some(PendingSend {
            request,
            reply: None,
            run: Some(run),
        });
        if self.send_deadline.is_none() {
            self.send_deadline = Some(Box::pin(sleep(self.send_timeout)));
        }
    }

    /// Write `send` to the open connection. On a write failure the request is
    /// queued again and the drop is returned for the machine to handle.
    async fn transmit(&mut self, send: PendingSend) -> Option<LinkInput> {
        let Some(connection) = self.connection.as_mut() else {
            self.pending = Some(send);
            return None;
        };
        match connection.send_text(send.request.encode()).await {
            Ok(()) => {
                let resent = send.run.is_some();
                let run = send.run.unwrap_or_else(RunId::new);
                metrics::record_request_sent(send.request.algorithm().as_str());
                info!(
                    target: "trace-link",
                    %run,
                    algorithm = %send.request.algorithm(),
                    origin = %send.request.origin(),
                    destination = %send.request.destination(),
                    resent,
                    "run request sent"
                );
                self.send_deadline = None;
                self.active_run = Some(run);
                if !resent {
                    self.sink.begin_run(run, &send.request);
                }
                if let Some(reply) = send.reply {
                    let _ = reply.send(Ok(run));
                }
                self.in_flight = Some(InFlight {
                    run,
                    request: send.request,
                });
                None
            }
            Err(err) => {
                warn!(target: "trace-link", %err, "request write failed, requeued");
                metrics::record_unclean_drop();
                self.record_fault(TransportFault::SendFailed {
                    reason: err.to_string(),
                });
                if self.send_deadline.is_none() {
                    self.send_deadline = Some(Box::pin(sleep(self.send_timeout)));
                }
                self.pending = Some(send);
                self.connection = None;
                Some(LinkInput::Dropped { clean: false })
            }
        }
    }

    async fn apply(&mut self, input: LinkInput) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            let before = self.machine.state();
            let actions = self.machine.handle(input);
            self.publish_state(before);
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    inputs.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, action: LinkAction) -> Option<LinkInput> {
        match action {
            LinkAction::BeginConnect => {
                self.begin_connect();
                None
            }
            LinkAction::AbortConnect => {
                self.connecting = None;
                None
            }
            LinkAction::ScheduleRetry(delay) => {
                metrics::record_retry_scheduled();
                info!(
                    target: "trace-link",
                    delay_ms = delay.as_millis() as u64,
                    attempts = self.machine.attempts(),
                    "reconnect scheduled"
                );
                self.retry_timer = Some(Box::pin(sleep(delay)));
                None
            }
            LinkAction::CancelRetry => {
                self.retry_timer = None;
                None
            }
            LinkAction::FlushPending => match self.pending.take() {
                Some(send) => self.transmit(send).await,
                None => None,
            },
            LinkAction::CancelPending => {
                self.send_deadline = None;
                if let Some(send) = self.pending.take() {
                    send.fail(
                        LinkError::new(LinkErrorKind::Cancelled)
                            .with_hint("link closed before the request was sent"),
                    );
                }
                None
            }
            LinkAction::Disconnect => {
                if let Some(mut connection) = self.connection.take() {
                    connection.close().await;
                }
                self.requeue_in_flight();
                Some(LinkInput::CloseCompleted)
            }
        }
    }

    fn begin_connect(&mut self) {
        metrics::record_connect_attempt();
        debug!(
            target: "trace-link",
            attempt = self.machine.attempts() + 1,
            "connecting"
        );
        let transport = Arc::clone(&self.transport);
        let timeout = self.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            let started = Instant::now();
            match tokio::time::timeout(timeout, transport.connect()).await {
                Ok(Ok(connection)) => {
                    metrics::record_connect_success(started.elapsed());
                    Ok(connection)
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Err(LinkError::new(LinkErrorKind::ConnectFailed)
                    .with_hint(format!("no connection within {} ms", timeout.as_millis()))
                    .retriable(true)),
            }
        }));
    }

    async fn on_connect_outcome(&mut self, outcome: Result<Box<dyn TraceConnection>, LinkError>) {
        match outcome {
            Ok(mut connection) => {
                if self.machine.state() != ConnectionState::Connecting {
                    connection.close().await;
                    return;
                }
                self.connection = Some(connection);
                self.spent = false;
                self.apply(LinkInput::Connected).await;
            }
            Err(err) => {
                metrics::record_connect_failure();
                let attempt = self.machine.attempts() + 1;
                warn!(target: "trace-link", attempt, %err, "connect attempt failed");
                self.record_fault(TransportFault::ConnectFailed {
                    attempt,
                    reason: err.to_string(),
                });
                self.apply(LinkInput::ConnectFailed).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Text(text) => self.on_text(&text),
            InboundFrame::Malformed(reason) => {
                metrics::record_malformed_frame();
                warn!(target: "trace-link", %reason, "dropping malformed frame");
                self.record_fault(ProtocolFault::MalformedFrame {
                    reason,
                    preview: String::new(),
                });
            }
            InboundFrame::Closed { clean, reason } => {
                self.connection = None;
                self.requeue_in_flight();
                if clean {
                    info!(target: "trace-link", ?reason, "server closed the connection");
                } else {
                    metrics::record_unclean_drop();
                    let reason = reason.unwrap_or_else(|| "connection lost".to_string());
                    warn!(target: "trace-link", %reason, "connection dropped");
                    self.record_fault(TransportFault::UncleanClose { reason });
                }
                self.apply(LinkInput::Dropped { clean }).await;
                if self.pending.is_some() && self.machine.state() == ConnectionState::Idle {
                    self.apply(LinkInput::OpenRequested).await;
                }
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        let event = match TraceEvent::decode(text) {
            Ok(event) => event,
            Err(err) => {
                metrics::record_malformed_frame();
                warn!(target: "trace-link", %err, "dropping malformed frame");
                self.record_fault(ProtocolFault::malformed(err.to_string(), text));
                return;
            }
        };
        metrics::record_frame(event.kind());
        match self.active_run {
            Some(run) => {
                self.in_flight = None;
                if event.is_terminal() {
                    self.spent = true;
                }
                self.sink.deliver(run, event);
            }
            None => {
                debug!(target: "trace-link", kind = event.kind(), "event without active run");
                self.record_fault(ProtocolFault::NoActiveRun {
                    event: event.kind().to_string(),
                });
            }
        }
    }

    fn on_send_timeout(&mut self) {
        let Some(send) = self.pending.take() else {
            return;
        };
        let timeout_ms = self.send_timeout.as_millis() as u64;
        metrics::record_delivery_timeout();
        warn!(
            target: "trace-link",
            timeout_ms,
            state = %self.machine.state(),
            "request not delivered in time"
        );
        self.record_fault(TransportFault::DeliveryTimeout { timeout_ms });
        send.fail(
            LinkError::new(LinkErrorKind::DeliveryTimeout)
                .with_hint(format!("link not open after {timeout_ms} ms"))
                .retriable(true),
        );
    }

    fn record_fault(&self, fault: impl Into<TraceFault>) {
        let record = self.faults.record(fault);
        self.sink.fault(&record.fault);
    }

    fn publish_state(&self, before: ConnectionState) {
        let state = self.machine.state();
        if state == before {
            return;
        }
        debug!(
            target: "trace-link",
            from = %before,
            to = %state,
            attempts = self.machine.attempts(),
            "connection state changed"
        );
        self.state_tx.send_replace(state);
        self.sink.state_changed(state);
    }

    async fn teardown(&mut self) {
        self.connecting = None;
        self.retry_timer = None;
        self.send_deadline = None;
        self.active_run = None;
        self.in_flight = None;
        if let Some(send) = self.pending.take() {
            send.fail(LinkError::driver_gone());
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        let before = self.machine.state();
        self.machine.handle(LinkInput::CloseRequested { intentional: true });
        self.machine.handle(LinkInput::CloseCompleted);
        self.publish_state(before);
        debug!(target: "trace-link", "connection driver stopped");
    }
}

async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot.as_mut() {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_frame(slot: &mut Option<Box<dyn TraceConnection>>) -> InboundFrame {
    match slot.as_mut() {
        Some(connection) => connection.next_frame().await,
        None => pending().await,
    }
}
