//! Reconcile metrics
//!
//! Counters and a duration histogram labelled by controller name, kept in a
//! dedicated `prometheus::Registry` and rendered by the probe server.

use std::time::{Duration, Instant};

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    reconciles: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("rke2_reconcile_total", "Reconciliations performed"),
            &["controller"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("rke2_reconcile_errors_total", "Reconciliations that returned an error"),
            &["controller"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("rke2_reconcile_duration_seconds", "Reconciliation duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["controller"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            failures,
            duration,
        })
    }

    /// Start timing a reconcile; the result is recorded by [`ReconcileTimer::finish`]
    pub fn start(&self, controller: &str) -> ReconcileTimer {
        ReconcileTimer {
            metrics: self.clone(),
            controller: controller.to_string(),
            started: Instant::now(),
        }
    }

    pub fn record(&self, controller: &str, elapsed: Duration, failed: bool) {
        self.reconciles.with_label_values(&[controller]).inc();
        if failed {
            self.failures.with_label_values(&[controller]).inc();
        }
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    pub fn reconcile_count(&self, controller: &str) -> u64 {
        self.reconciles.with_label_values(&[controller]).get()
    }

    pub fn error_count(&self, controller: &str) -> u64 {
        self.failures.with_label_values(&[controller]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of all registered metrics
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Running reconcile measurement
pub struct ReconcileTimer {
    metrics: ReconcileMetrics,
    controller: String,
    started: Instant,
}

impl ReconcileTimer {
    pub fn finish(self, failed: bool) {
        self.metrics
            .record(&self.controller, self.started.elapsed(), failed);
    }
}
