//! Connection lifecycle as a pure transition table.
//!
//! [`LinkMachine::handle`] maps `(state, input)` to a new state plus the side
//! effects the driver must perform. Nothing here touches sockets or timers,
//! so every transition is testable without a runtime.

use std::time::Duration;

use routewatch_core_types::ConnectionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Delay before reconnecting after the server closed cleanly.
    pub clean_delay: Duration,
    pub reconnect_after_clean: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            max: Duration::from_millis(10_000),
            clean_delay: Duration::from_millis(500),
            reconnect_after_clean: true,
        }
    }
}

impl RetryPolicy {
    /// `min(base * attempts, max)` for the given 1-based attempt count.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.base.saturating_mul(attempts.max(1)).min(self.max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkInput {
    OpenRequested,
    Connected,
    ConnectFailed,
    Dropped { clean: bool },
    RetryElapsed,
    CloseRequested { intentional: bool },
    CloseCompleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkAction {
    BeginConnect,
    AbortConnect,
    ScheduleRetry(Duration),
    CancelRetry,
    FlushPending,
    /// Fail the queued request because the user closed the link.
    CancelPending,
    Disconnect,
}

#[derive(Clone, Debug)]
pub struct LinkMachine {
    state: ConnectionState,
    attempts: u32,
    stopped: bool,
    policy: RetryPolicy,
}

impl LinkMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            stopped: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Set by an intentional close, cleared by the next explicit open.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handle(&mut self, input: LinkInput) -> Vec<LinkAction> {
        use ConnectionState::*;
        use LinkAction::*;
        use LinkInput::*;

        match (self.state, input) {
            (Idle | WaitingToRetry, OpenRequested) => {
                self.stopped = false;
                self.state = Connecting;
                vec![CancelRetry, BeginConnect]
            }
            (Connecting | Open | Closing, OpenRequested) => Vec::new(),

            (Connecting, Connected) => {
                self.state = Open;
                self.attempts = 0;
                vec![FlushPending]
            }
            (Idle | Open | Closing | WaitingToRetry, Connected) => Vec::new(),

            (Connecting, ConnectFailed) => self.retry_or_idle(),
            (Idle | Open | Closing | WaitingToRetry, ConnectFailed) => Vec::new(),

            (Open, Dropped { clean: false }) => self.retry_or_idle(),
            (Open, Dropped { clean: true }) => {
                if self.stopped || !self.policy.reconnect_after_clean {
                    self.state = Idle;
                    Vec::new()
                } else {
                    self.state = WaitingToRetry;
                    vec![ScheduleRetry(self.policy.clean_delay)]
                }
            }
            (Idle | Connecting | Closing | WaitingToRetry, Dropped { .. }) => Vec::new(),

            (WaitingToRetry, RetryElapsed) => {
                if self.stopped {
                    self.state = Idle;
                    Vec::new()
                } else {
                    self.state = Connecting;
                    vec![BeginConnect]
                }
            }
            (Idle | Connecting | Open | Closing, RetryElapsed) => Vec::new(),

            (state, CloseRequested { intentional: true }) => {
                self.stopped = true;
                self.attempts = 0;
                match state {
                    Open => {
                        self.state = Closing;
                        vec![CancelRetry, CancelPending, Disconnect]
                    }
                    Connecting => {
                        self.state = Idle;
                        vec![AbortConnect, CancelRetry, CancelPending]
                    }
                    Closing => vec![CancelRetry, CancelPending],
                    Idle | WaitingToRetry => {
                        self.state = Idle;
                        vec![CancelRetry, CancelPending]
                    }
                }
            }
            (Open, CloseRequested { intentional: false }) => {
                self.state = Closing;
                vec![Disconnect]
            }
            (Connecting, CloseRequested { intentional: false }) => {
                let mut actions = vec![AbortConnect];
                actions.extend(self.retry_or_idle());
                actions
            }
            (Idle | Closing | WaitingToRetry, CloseRequested { intentional: false }) => Vec::new(),

            (Closing, CloseCompleted) => self.retry_or_idle(),
            (Idle | Connecting | Open | WaitingToRetry, CloseCompleted) => Vec::new(),
        }
    }

    fn retry_or_idle(&mut self) -> Vec<LinkAction> {
        if self.stopped {
            self.state = ConnectionState::Idle;
            return Vec::new();
        }
        self.attempts = self.attempts.saturating_add(1);
        self.state = ConnectionState::WaitingToRetry;
        vec![LinkAction::ScheduleRetry(self.policy.backoff(self.attempts))]
    }
}
