//! Process-wide metrics registry (C11).
//!
//! `spec.md` §9 names the metrics registry as one of the two legitimate
//! process-wide singletons (the other being the concurrency semaphore, which
//! lives inside `provisioner_core::job::JobManager`). Built with the
//! `prometheus` crate, the stack used across the retrieval pack for exactly
//! this purpose.

use prometheus::{CounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: CounterVec,
    pub jobs_total: CounterVec,
    pub active_jobs: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("provisioner_http_requests_total", "Total HTTP requests handled"),
            &["method", "endpoint", "status"],
        )
        .expect("valid metric definition");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("unique metric name");

        let jobs_total = CounterVec::new(
            Opts::new("provisioner_jobs_total", "Total provisioning jobs by terminal/started status"),
            &["status"],
        )
        .expect("valid metric definition");
        registry.register(Box::new(jobs_total.clone())).expect("unique metric name");

        let active_jobs = IntGauge::new("provisioner_active_jobs", "Currently running provisioning jobs")
            .expect("valid metric definition");
        registry.register(Box::new(active_jobs.clone())).expect("unique metric name");

        Self { registry, http_requests_total, jobs_total, active_jobs }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        TextEncoder::new()
            .encode_utf8(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for valid metric families");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_all_three_required_series() {
        let metrics = Metrics::new();
        metrics.http_requests_total.with_label_values(&["GET", "/health", "200"]).inc();
        metrics.jobs_total.with_label_values(&["started"]).inc();
        metrics.jobs_total.with_label_values(&["completed"]).inc();
        metrics.jobs_total.with_label_values(&["failed"]).inc();
        metrics.active_jobs.set(1);

        let text = metrics.encode();
        assert!(text.contains("provisioner_http_requests_total"));
        assert!(text.contains("provisioner_jobs_total"));
        assert!(text.contains("provisioner_active_jobs"));
        assert!(text.contains("status=\"started\""));
        assert!(text.contains("status=\"completed\""));
        assert!(text.contains("status=\"failed\""));
    }
}
