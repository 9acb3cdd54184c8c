//! Observability infrastructure for engine tracking
//!
//! Provides:
//! - Prometheus metrics (refresh latency, refresh errors, cache sizes, health, push events)
//! - Structured logging of engine lifecycle events with tracing
//! - A helper to install the tracing subscriber

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Histogram buckets for refresh latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    refresh_latency_seconds: HistogramVec,
    refresh_errors: IntCounterVec,
    containers: IntGaugeVec,
    images: IntGaugeVec,
    healthy: IntGaugeVec,
    push_events: IntCounterVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            refresh_latency_seconds: register_histogram_vec!(
                "node_agent_refresh_latency_seconds",
                "Time spent reconciling engine state",
                &["engine", "kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_latency_seconds"),

            refresh_errors: register_int_counter_vec!(
                "node_agent_refresh_errors_total",
                "Number of failed reconciliations",
                &["engine", "kind"]
            )
            .expect("Failed to register refresh_errors"),

            containers: register_int_gauge_vec!(
                "node_agent_containers",
                "Number of containers in the engine cache",
                &["engine"]
            )
            .expect("Failed to register containers"),

            images: register_int_gauge_vec!(
                "node_agent_images",
                "Number of images in the engine cache",
                &["engine"]
            )
            .expect("Failed to register images"),

            healthy: register_int_gauge_vec!(
                "node_agent_engine_healthy",
                "1 if the last refresh cycle succeeded",
                &["engine"]
            )
            .expect("Failed to register engine_healthy"),

            push_events: register_int_counter_vec!(
                "node_agent_push_events_total",
                "Push events received from the engine",
                &["engine", "status"]
            )
            .expect("Failed to register push_events"),
        }
    }
}

/// Metrics handle bound to one engine address.
///
/// Clones share the global collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    engine: String,
}

impl EngineMetrics {
    /// Create a handle labelled with the engine address
    pub fn new(engine: impl Into<String>) -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self {
            engine: engine.into(),
        }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    /// Record a refresh latency observation
    pub fn observe_refresh(&self, kind: &str, duration_secs: f64) {
        self.inner()
            .refresh_latency_seconds
            .with_label_values(&[self.engine.as_str(), kind])
            .observe(duration_secs);
    }

    /// Increment the failed refresh counter
    pub fn inc_refresh_errors(&self, kind: &str) {
        self.inner()
            .refresh_errors
            .with_label_values(&[self.engine.as_str(), kind])
            .inc();
    }

    /// Set the cached container count
    pub fn set_containers(&self, count: usize) {
        self.inner()
            .containers
            .with_label_values(&[self.engine.as_str()])
            .set(count as i64);
    }

    /// Set the cached image count
    pub fn set_images(&self, count: usize) {
        self.inner()
            .images
            .with_label_values(&[self.engine.as_str()])
            .set(count as i64);
    }

    /// Set the health gauge
    pub fn set_healthy(&self, healthy: bool) {
        self.inner()
            .healthy
            .with_label_values(&[self.engine.as_str()])
            .set(i64::from(healthy));
    }

    /// Increment the push event counter for a status
    pub fn inc_push_events(&self, status: &str) {
        self.inner()
            .push_events
            .with_label_values(&[self.engine.as_str(), status])
            .inc();
    }
}

/// Structured logger for engine lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    addr: String,
}

impl StructuredLogger {
    /// Create a logger for the engine at `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Log a successful connection
    pub fn log_connected(&self, id: &str, name: &str, cpus: i64, memory: i64) {
        info!(
            event = "engine_connect",
            addr = %self.addr,
            id = %id,
            name = %name,
            cpus = cpus,
            memory_bytes = memory,
            "Connected to engine"
        );
    }

    /// Log an aborted connection and the step that failed
    pub fn log_connect_failed(&self, step: &str, err: &dyn std::fmt::Display) {
        warn!(
            event = "engine_connect_failed",
            addr = %self.addr,
            step = %step,
            error = %err,
            "Engine connection aborted"
        );
    }

    /// Log an engine becoming unreachable
    pub fn log_health_lost(&self, id: &str, name: &str, err: &dyn std::fmt::Display) {
        error!(
            event = "engine_disconnect",
            addr = %self.addr,
            id = %id,
            name = %name,
            error = %err,
            "Flagging engine as unhealthy, state refresh failed"
        );
    }

    /// Log an engine becoming reachable again
    pub fn log_health_recovered(&self, id: &str, name: &str) {
        info!(
            event = "engine_reconnect",
            addr = %self.addr,
            id = %id,
            name = %name,
            "Engine is reachable again"
        );
    }

    /// Log an explicit teardown
    pub fn log_disconnected(&self) {
        info!(
            event = "engine_teardown",
            addr = %self.addr,
            "Stopped tracking engine"
        );
    }
}

/// Install a global tracing subscriber honouring `RUST_LOG` (default `info`).
///
/// Returns an error instead of panicking if a subscriber is already set.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}
