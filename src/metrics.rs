//! Prometheus metrics for the admission pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup **before** serving traffic.
//! The helper functions (`inc_admitted`, `inc_rejected`, …) are no-ops if
//! `init_metrics` was never called, so the pipeline is always safe to run —
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `gateway_requests_total` | Counter | `outcome` |
//! | `gateway_rejections_total` | Counter | `gate` |
//! | `gateway_dispatch_duration_seconds` | Histogram | `model` |
//! | `gateway_dispatch_failovers_total` | Counter | `model` |
//! | `gateway_in_flight` | Gauge | `model` |

use crate::GatewayError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the gateway, bundled so they can be stored in
/// a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Completed requests by terminal outcome (`admitted` / error kind).
    pub requests_total: CounterVec,
    /// Rejections by the gate that produced them.
    pub rejections_total: CounterVec,
    /// Backend dispatch latency per model.
    pub dispatch_duration: HistogramVec,
    /// Failovers attempted per (primary) model.
    pub failovers_total: CounterVec,
    /// Requests currently dispatched per model.
    pub in_flight: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private
/// registry.
///
/// Must be called once at process startup before serving traffic. Calling
/// it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`GatewayError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), GatewayError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("gateway_requests_total", "Completed requests by outcome"),
        &["outcome"],
    )
    .map_err(|e| GatewayError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(requests_total.clone()))
        .map_err(|e| GatewayError::Other(format!("metrics registration failed: {e}")))?;

    let rejections_total = CounterVec::new(
        Opts::new("gateway_rejections_total", "Rejections by gate"),
        &["gate"],
    )
    .map_err(|e| GatewayError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(rejections_total.clone()))
        .map_err(|e| GatewayError::Other(format!("metrics registration failed: {e}")))?;

    let dispatch_duration = HistogramVec::new(
        HistogramOpts::new(
            "gateway_dispatch_duration_seconds",
            "Backend dispatch latency per model",
        ),
        &["model"],
    )
    .map_err(|e| GatewayError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(dispatch_duration.clone()))
        .map_err(|e| GatewayError::Other(format!("metrics registration failed: {e}")))?;

    let failovers_total = CounterVec::new(
        Opts::new(
            "gateway_dispatch_failovers_total",
            "Failover attempts per primary model",
        ),
        &["model"],
    )
    .map_err(|e| GatewayError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(failovers_total.clone()))
        .map_err(|e| GatewayError::Other(format!("metrics registration failed: {e}")))?;

    let in_flight = IntGaugeVec::new(
        Opts::new("gateway_in_flight", "Requests currently dispatched per model"),
        &["model"],
    )
    .map_err(|e| GatewayError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(in_flight.clone()))
        .map_err(|e| GatewayError::Other(format!("metrics registration failed: {e}")))?;

    // If another thread raced us, the first one wins — both initializations
    // produce identical metric descriptors, so neither outcome is incorrect.
    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        rejections_total,
        dispatch_duration,
        failovers_total,
        in_flight,
    });

    Ok(())
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one request completing with the given terminal outcome label
/// (`"admitted"` or an error kind).
///
/// No-op if metrics have not been initialised.
pub fn inc_request(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Count one rejection attributed to a pipeline gate.
///
/// No-op if metrics have not been initialised.
pub fn inc_rejection(gate: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.rejections_total.get_metric_with_label_values(&[gate]) {
            c.inc();
        }
    }
}

/// Record one backend dispatch latency observation.
///
/// No-op if metrics have not been initialised.
pub fn observe_dispatch(model: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.dispatch_duration.get_metric_with_label_values(&[model]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one failover away from `model`.
///
/// No-op if metrics have not been initialised.
pub fn inc_failover(model: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.failovers_total.get_metric_with_label_values(&[model]) {
            c.inc();
        }
    }
}

/// Set the in-flight gauge for one model.
///
/// No-op if metrics have not been initialised.
pub fn set_in_flight(model: &str, count: i64) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.in_flight.get_metric_with_label_values(&[model]) {
            g.set(count);
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails. Observability degrades gracefully rather than panicking.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
