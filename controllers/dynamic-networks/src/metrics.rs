//! Prometheus metrics

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Controller metrics, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    passes: IntCounterVec,
    operations: IntCounterVec,
    in_flight: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("dynamic_networks".to_string()), None).map_err(metrics_error)?;

        let passes = IntCounterVec::new(
            Opts::new("reconcile_passes_total", "Reconcile passes by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Attach and detach operations by kind and result"),
            &["kind", "result"],
        )
        .map_err(metrics_error)?;
        let in_flight = IntGauge::new("passes_in_flight", "Reconcile passes currently running").map_err(metrics_error)?;

        registry.register(Box::new(passes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(operations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(in_flight.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            passes,
            operations,
            in_flight,
        })
    }

    /// Count a finished pass
    pub fn record_pass(&self, outcome: &str) {
        self.passes.with_label_values(&[outcome]).inc();
    }

    /// Count an executed operation
    pub fn record_operation(&self, kind: &str, result: &str) {
        self.operations.with_label_values(&[kind, result]).inc();
    }

    /// Mark a pass as running until the returned guard is dropped
    pub fn pass_started(&self) -> InFlightGuard {
        self.in_flight.inc();
        InFlightGuard {
            gauge: self.in_flight.clone(),
        }
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::InvalidConfig(format!("metrics are not UTF-8: {e}")))
    }
}

/// Decrements the in-flight gauge when a pass ends, cancelled or not.
#[derive(Debug)]
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

fn metrics_error(e: prometheus::Error) -> ControllerError {
    ControllerError::InvalidConfig(format!("metrics registry: {e}"))
}
