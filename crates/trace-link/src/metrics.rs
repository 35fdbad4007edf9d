use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, Histogram, IntCounter, IntCounterVec, Opts, Registry,
};
use serde::Serialize;
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LinkMetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub retries_scheduled: u64,
    pub requests_sent: u64,
    pub delivery_timeouts: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub unclean_drops: u64,
}

static CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static CONNECT_FAILURES: AtomicU64 = AtomicU64::new(0);
static RETRIES_SCHEDULED: AtomicU64 = AtomicU64::new(0);
static REQUESTS_SENT: AtomicU64 = AtomicU64::new(0);
static DELIVERY_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MALFORMED_FRAMES: AtomicU64 = AtomicU64::new(0);
static UNCLEAN_DROPS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref LINK_CONNECT_ATTEMPTS_TOTAL: IntCounter = IntCounter::new(
        "routewatch_link_connect_attempts_total",
        "Total websocket connect attempts"
    )
    .expect("metric definition");
    static ref LINK_CONNECT_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "routewatch_link_connect_failures_total",
        "Total failed websocket connect attempts"
    )
    .expect("metric definition");
    static ref LINK_CONNECT_DURATION: Histogram = Histogram::with_opts(histogram_opts!(
        "routewatch_link_connect_duration_seconds",
        "Time to open the websocket",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
    ))
    .expect("metric definition");
    static ref LINK_RETRIES_SCHEDULED_TOTAL: IntCounter = IntCounter::new(
        "routewatch_link_retries_scheduled_total",
        "Total reconnects scheduled"
    )
    .expect("metric definition");
    static ref LINK_REQUESTS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("routewatch_link_requests_sent_total", "Run requests written to the wire"),
        &["algorithm"]
    )
    .expect("metric definition");
    static ref LINK_DELIVERY_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "routewatch_link_delivery_timeouts_total",
        "Queued run requests that were never sent"
    )
    .expect("metric definition");
    static ref LINK_FRAMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("routewatch_link_frames_total", "Inbound frames by event type"),
        &["type"]
    )
    .expect("metric definition");
    static ref LINK_UNCLEAN_DROPS_TOTAL: IntCounter = IntCounter::new(
        "routewatch_link_unclean_drops_total",
        "Connections lost without a close handshake"
    )
    .expect("metric definition");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(target: "trace-link", ?err, "failed to register link metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, LINK_CONNECT_ATTEMPTS_TOTAL.clone());
    register(registry, LINK_CONNECT_FAILURES_TOTAL.clone());
    register(registry, LINK_CONNECT_DURATION.clone());
    register(registry, LINK_RETRIES_SCHEDULED_TOTAL.clone());
    register(registry, LINK_REQUESTS_SENT_TOTAL.clone());
    register(registry, LINK_DELIVERY_TIMEOUTS_TOTAL.clone());
    register(registry, LINK_FRAMES_TOTAL.clone());
    register(registry, LINK_UNCLEAN_DROPS_TOTAL.clone());
}

pub fn record_connect_attempt() {
    CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
    LINK_CONNECT_ATTEMPTS_TOTAL.inc();
}

pub fn record_connect_success(duration: Duration) {
    LINK_CONNECT_DURATION.observe(duration.as_secs_f64());
}

pub fn record_connect_failure() {
    CONNECT_FAILURES.fetch_add(1, Ordering::Relaxed);
    LINK_CONNECT_FAILURES_TOTAL.inc();
}

pub fn record_retry_scheduled() {
    RETRIES_SCHEDULED.fetch_add(1, Ordering::Relaxed);
    LINK_RETRIES_SCHEDULED_TOTAL.inc();
}

pub fn record_request_sent(algorithm: &str) {
    REQUESTS_SENT.fetch_add(1, Ordering::Relaxed);
    LINK_REQUESTS_SENT_TOTAL
        .with_label_values(&[algorithm])
        .inc();
}

pub fn record_delivery_timeout() {
    DELIVERY_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    LINK_DELIVERY_TIMEOUTS_TOTAL.inc();
}

/// A decoded frame carrying an event of type `kind`.
pub fn record_frame(kind: &str) {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
    LINK_FRAMES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_malformed_frame() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
    MALFORMED_FRAMES.fetch_add(1, Ordering::Relaxed);
    LINK_FRAMES_TOTAL.with_label_values(&["malformed"]).inc();
}

pub fn record_unclean_drop() {
    UNCLEAN_DROPS.fetch_add(1, Ordering::Relaxed);
    LINK_UNCLEAN_DROPS_TOTAL.inc();
}

/// Process-wide totals across every connection manager.
pub fn snapshot() -> LinkMetricsSnapshot {
    LinkMetricsSnapshot {
        connect_attempts: CONNECT_ATTEMPTS.load(Ordering::Relaxed),
        connect_failures: CONNECT_FAILURES.load(Ordering::Relaxed),
        retries_scheduled: RETRIES_SCHEDULED.load(Ordering::Relaxed),
        requests_sent: REQUESTS_SENT.load(Ordering::Relaxed),
        delivery_timeouts: DELIVERY_TIMEOUTS.load(Ordering::Relaxed),
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        malformed_frames: MALFORMED_FRAMES.load(Ordering::Relaxed),
        unclean_drops: UNCLEAN_DROPS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        record_frame("visited");
        record_malformed_frame();
        record_connect_attempt();
        let after = snapshot();
        assert!(after.frames_received >= before.frames_received + 2);
        assert!(after.malformed_frames > before.malformed_frames);
        assert!(after.connect_attempts > before.connect_attempts);
    }

    #[test]
    fn registered_counters_show_up_in_text_exposition() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_request_sent("astar");
        record_frame("done");
        record_connect_success(Duration::from_millis(3));

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("routewatch_link_requests_sent_total{algorithm=\"astar\"}"));
        assert!(text.contains("routewatch_link_frames_total{type=\"done\"}"));
        assert!(text.contains("routewatch_link_connect_duration_seconds_count"));
    }
}
