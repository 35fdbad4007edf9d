//! Separate error channel for link faults.
//!
//! Faults never reach the trace state: a malformed frame or a dropped socket
//! is recorded here and counted, and the consumer decides what to show.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

const DEFAULT_CAPACITY: usize = 256;
const PREVIEW_CHARS: usize = 120;

#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportFault {
    #[error("connect attempt {attempt} failed: {reason}")]
    ConnectFailed { attempt: u32, reason: String },
    #[error("connection dropped: {reason}")]
    UncleanClose { reason: String },
    #[error("write failed: {reason}")]
    SendFailed { reason: String },
    #[error("request not delivered within {timeout_ms} ms")]
    DeliveryTimeout { timeout_ms: u64 },
}

#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolFault {
    #[error("malformed frame ({reason}): {preview}")]
    MalformedFrame { reason: String, preview: String },
    #[error("'{event}' event arrived with no active run")]
    NoActiveRun { event: String },
}

impl ProtocolFault {
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        let mut preview: String = raw.chars().take(PREVIEW_CHARS).collect();
        if raw.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        ProtocolFault::MalformedFrame {
            reason: reason.into(),
            preview,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[serde(tag = "channel", content = "fault", rename_all = "snake_case")]
pub enum TraceFault {
    #[error("transport: {0}")]
    Transport(TransportFault),
    #[error("protocol: {0}")]
    Protocol(ProtocolFault),
}

impl From<TransportFault> for TraceFault {
    fn from(fault: TransportFault) -> Self {
        TraceFault::Transport(fault)
    }
}

impl From<ProtocolFault> for TraceFault {
    fn from(fault: ProtocolFault) -> Self {
        TraceFault::Protocol(fault)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaultRecord {
    pub fault: TraceFault,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FaultCounts {
    pub transport: u64,
    pub protocol: u64,
    pub malformed_frames: u64,
}

#[derive(Debug)]
struct Inner {
    records: VecDeque<FaultRecord>,
    counts: FaultCounts,
}

/// Bounded log of recent faults plus running totals.
#[derive(Debug)]
pub struct FaultLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                records: VecDeque::new(),
                counts: FaultCounts::default(),
            }),
        }
    }

    pub fn record(&self, fault: impl Into<TraceFault>) -> FaultRecord {
        let record = FaultRecord {
            fault: fault.into(),
            at: Utc::now(),
        };
        let mut guard = self.inner.lock();
        match &record.fault {
            TraceFault::Transport(_) => guard.counts.transport += 1,
            TraceFault::Protocol(fault) => {
                guard.counts.protocol += 1;
                if matches!(fault, ProtocolFault::MalformedFrame { .. }) {
                    guard.counts.malformed_frames += 1;
                }
            }
        }
        if guard.records.len() == self.capacity {
            guard.records.pop_front();
        }
        guard.records.push_back(record.clone());
        record
    }

    /// Recent faults, oldest first.
    pub fn snapshot(&self) -> Vec<FaultRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    /// Drain recent faults. Totals are kept.
    pub fn take(&self) -> Vec<FaultRecord> {
        self.inner.lock().records.drain(..).collect()
    }

    pub fn latest(&self) -> Option<FaultRecord> {
        self.inner.lock().records.back().cloned()
    }

    pub fn counts(&self) -> FaultCounts {
        self.inner.lock().counts
    }

    /// Forget both the recent faults and the totals.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.records.clear();
        guard.counts = FaultCounts::default();
    }
}
