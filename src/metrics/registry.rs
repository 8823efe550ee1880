use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // request path
        describe_counter!(
            "shed_requests_total",
            Unit::Count,
            "Total requests handled, labeled by outcome (shed/forwarded)"
        );
        describe_histogram!(
            "shed_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from client perspective"
        );

        // admission controller
        describe_gauge!(
            "shed_sample_fraction",
            Unit::Count,
            "Current admission sample fraction F, in [F_min, 1.0]"
        );
        describe_gauge!(
            "shed_ema_latency_seconds",
            Unit::Seconds,
            "Exponentially-weighted moving average of upstream response latency"
        );

        // response cache
        describe_counter!(
            "shed_cache_requests_total",
            Unit::Count,
            "Total requests to the cached endpoint, labeled by outcome (hit/miss/bypass)"
        );

        // request buffer (alt. mode)
        describe_gauge!(
            "shed_buffer_queue_length",
            Unit::Count,
            "Current length of the request buffer queue"
        );
        describe_gauge!(
            "shed_buffer_forward_avg_seconds",
            Unit::Seconds,
            "Rolling cumulative-mean forward duration for buffered requests"
        );
        describe_counter!(
            "shed_buffer_enqueue_total",
            Unit::Count,
            "Total requests enqueued into the request buffer, labeled by outcome"
        );

        // connections
        describe_gauge!(
            "shed_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "shed_connections_total",
            Unit::Count,
            "Total accepted downstream connections, labeled by outcome (accepted/error)"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Build a `Metrics` handle without installing it as the process-global
    /// recorder. Several unit tests in this crate construct their own
    /// `ProxyState`/`BufferState`, and `install()` may only succeed once per
    /// process — this gives each test its own handle instead.
    #[cfg(test)]
    pub fn install_for_test() -> Self {
        let (_recorder, handle) = PrometheusBuilder::new()
            .build()
            .expect("failed to build standalone prometheus recorder");
        Self { handle }
    }
}
