use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, Histogram, IntCounterVec, Opts, Registry};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub boots: u64,
    pub visits: u64,
    pub visit_timeouts: u64,
    pub reboots: u64,
    pub reboot_failures: u64,
    pub intercepted: u64,
}

static BOOTS: AtomicU64 = AtomicU64::new(0);
static VISITS: AtomicU64 = AtomicU64::new(0);
static VISIT_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static REBOOTS: AtomicU64 = AtomicU64::new(0);
static REBOOT_FAILURES: AtomicU64 = AtomicU64::new(0);
static INTERCEPTED: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref BOOTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prerender_boots_total", "Session boots by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref VISITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prerender_visits_total", "Visits by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref VISIT_DURATION: Histogram = Histogram::with_opts(histogram_opts!(
        "prerender_visit_duration_seconds",
        "Visit latency including capture",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ))
    .unwrap();
    static ref REBOOTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prerender_reboots_total", "Timeout-triggered reboots by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref INTERCEPTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prerender_intercepted_requests_total", "Paused requests by action"),
        &["action"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register session metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, BOOTS_TOTAL.clone());
    register(registry, VISITS_TOTAL.clone());
    register(registry, VISIT_DURATION.clone());
    register(registry, REBOOTS_TOTAL.clone());
    register(registry, INTERCEPTED_TOTAL.clone());
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

pub(crate) fn record_boot(ok: bool) {
    BOOTS.fetch_add(1, Ordering::Relaxed);
    BOOTS_TOTAL.with_label_values(&[outcome(ok)]).inc();
}

pub(crate) fn record_visit(outcome: &str, duration: Duration) {
    VISITS.fetch_add(1, Ordering::Relaxed);
    if outcome == "timeout" {
        VISIT_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    }
    VISITS_TOTAL.with_label_values(&[outcome]).inc();
    VISIT_DURATION.observe(duration.as_secs_f64());
}

pub(crate) fn record_reboot(ok: bool) {
    REBOOTS.fetch_add(1, Ordering::Relaxed);
    if !ok {
        REBOOT_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
    REBOOTS_TOTAL.with_label_values(&[outcome(ok)]).inc();
}

pub(crate) fn record_interception(action: &str) {
    INTERCEPTED.fetch_add(1, Ordering::Relaxed);
    INTERCEPTED_TOTAL.with_label_values(&[action]).inc();
}

pub fn snapshot() -> SessionMetricsSnapshot {
    SessionMetricsSnapshot {
        boots: BOOTS.load(Ordering::Relaxed),
        visits: VISITS.load(Ordering::Relaxed),
        visit_timeouts: VISIT_TIMEOUTS.load(Ordering::Relaxed),
        reboots: REBOOTS.load(Ordering::Relaxed),
        reboot_failures: REBOOT_FAILURES.load(Ordering::Relaxed),
        intercepted: INTERCEPTED.load(Ordering::Relaxed),
    }
}
