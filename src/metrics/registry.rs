use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Handle around the global Prometheus recorder.
///
/// Once installed, the `metrics` macros record from anywhere in the crate;
/// the handle only exists to render the admin `/metrics` page.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Call once per process, before serving.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .context("invalid histogram buckets")?
            .install_recorder()
            .context("failed to install metrics recorder")?;

        describe_counter!(
            "gateway_http_requests_total",
            Unit::Count,
            "Total HTTP requests answered by the gateway"
        );
        describe_histogram!(
            "gateway_http_request_duration_seconds",
            Unit::Seconds,
            "Request duration from the client's perspective"
        );
        describe_counter!(
            "gateway_rate_limit_rejected_total",
            Unit::Count,
            "Requests rejected by the global rate limiter"
        );
        describe_counter!(
            "gateway_blocklist_rejected_total",
            Unit::Count,
            "Requests rejected by a route blocklist"
        );
        describe_counter!(
            "gateway_auth_total",
            Unit::Count,
            "Authentication gate outcomes"
        );
        describe_counter!(
            "gateway_upstream_errors_total",
            Unit::Count,
            "Backend transport failures answered with 502"
        );
        describe_counter!(
            "gateway_health_checks_total",
            Unit::Count,
            "Route health probes performed"
        );
        describe_gauge!(
            "gateway_connections_active",
            Unit::Count,
            "Open downstream connections"
        );
        describe_counter!(
            "gateway_connections_total",
            Unit::Count,
            "Downstream connections accepted"
        );

        Ok(Self { handle })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
