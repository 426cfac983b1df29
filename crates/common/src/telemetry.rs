//! Observability handle passed to each component.

use std::time::Duration;

/// Metric emitter scoped to one service.
///
/// Components receive a `Telemetry` at construction instead of reaching for
/// process-wide state; every metric it emits carries a `service` label so the
/// three choreography participants can share one exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    service: &'static str,
}

impl Telemetry {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }

    /// Returns the service label attached to every metric.
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Increments a counter by one.
    pub fn incr(&self, name: &'static str) {
        metrics::counter!(name, "service" => self.service).increment(1);
    }

    /// Increments a counter carrying one extra label.
    pub fn incr_with(&self, name: &'static str, key: &'static str, value: &'static str) {
        metrics::counter!(name, "service" => self.service, key => value).increment(1);
    }

    /// Records a duration in seconds on a histogram.
    pub fn record_duration(&self, name: &'static str, elapsed: Duration) {
        metrics::histogram!(name, "service" => self.service).record(elapsed.as_secs_f64());
    }
}
