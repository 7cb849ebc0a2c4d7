//! Per-request outcome reporting.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, Registry};

use crate::authz::Request;
use crate::error::{Result, WardenError};

/// Records the outcome and latency of each admission decision.
pub trait MetricReporter: Send + Sync {
    fn duration(&self, req: &Request, blocked: bool, error_occurred: bool, elapsed: Duration);
}

/// Reporter that drops everything on the floor.
pub struct NullReporter;

impl MetricReporter for NullReporter {
    fn duration(&self, _req: &Request, _blocked: bool, _error_occurred: bool, _elapsed: Duration) {
    }
}

/// Prometheus-backed reporter.
///
/// Registers one histogram in the given registry; whoever embeds Warden is
/// responsible for exposing the registry.
pub struct PrometheusReporter {
    durations: HistogramVec,
    ingress_class: String,
}

impl PrometheusReporter {
    pub fn new(registry: &Registry, ingress_class: &str) -> Result<Self> {
        let opts = HistogramOpts::new(
            "request_duration_seconds",
            "Admission decision latency by outcome.",
        )
        .namespace("warden");

        let durations =
            HistogramVec::new(opts, &["authority", "blocked", "error", "ingress_class"])
                .map_err(|err| WardenError::Config(err.to_string()))?;
        registry
            .register(Box::new(durations.clone()))
            .map_err(|err| WardenError::Config(err.to_string()))?;

        Ok(Self {
            durations,
            ingress_class: ingress_class.to_string(),
        })
    }
}

impl MetricReporter for PrometheusReporter {
    fn duration(&self, req: &Request, blocked: bool, error_occurred: bool, elapsed: Duration) {
        self.durations
            .with_label_values(&[
                req.authority.as_str(),
                if blocked { "true" } else { "false" },
                if error_occurred { "true" } else { "false" },
                self.ingress_class.as_str(),
            ])
            .observe(elapsed.as_secs_f64());
    }
}
