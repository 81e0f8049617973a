use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    upstream_errors_total: IntCounterVec,
    stream_chunks_total: IntCounterVec,
    stream_dropped_lines_total: IntCounterVec,
}

pub struct InflightGuard<'a> {
    metrics: &'a RelayMetrics,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "relay_http_requests_total",
                "Total HTTP requests processed by the relay"
            ),
            &["path", "method", "status", "stream"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "relay_http_request_duration_seconds",
                "Time until the response head is sent, in seconds",
            ),
            &["path", "method", "stream"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "relay_inflight_requests",
            "Requests currently being set up by the relay",
        )
        .expect("valid inflight_requests metric");

        let upstream_errors_total = IntCounterVec::new(
            opts!(
                "relay_upstream_errors_total",
                "Upstream failures by backend and kind"
            ),
            &["backend", "kind"],
        )
        .expect("valid upstream_errors_total metric");

        let stream_chunks_total = IntCounterVec::new(
            opts!(
                "relay_stream_chunks_total",
                "Text chunks relayed from streaming backends"
            ),
            &["backend"],
        )
        .expect("valid stream_chunks_total metric");

        let stream_dropped_lines_total = IntCounterVec::new(
            opts!(
                "relay_stream_dropped_lines_total",
                "Stream lines dropped because they did not parse"
            ),
            &["backend"],
        )
        .expect("valid stream_dropped_lines_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_requests.clone()))
            .expect("register inflight_requests");
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .expect("register upstream_errors_total");
        registry
            .register(Box::new(stream_chunks_total.clone()))
            .expect("register stream_chunks_total");
        registry
            .register(Box::new(stream_dropped_lines_total.clone()))
            .expect("register stream_dropped_lines_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            upstream_errors_total,
            stream_chunks_total,
            stream_dropped_lines_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.inflight_requests.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(
        &self,
        path: &str,
        method: &str,
        stream: bool,
        status: u16,
        duration: Duration,
    ) {
        let stream_label = if stream { "true" } else { "false" };
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label, stream_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method, stream_label])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_upstream_error(&self, backend: &str, kind: &str) {
        self.upstream_errors_total
            .with_label_values(&[backend, kind])
            .inc();
    }

    pub fn observe_stream(&self, backend: &str, chunks: u64, dropped_lines: u64) {
        self.stream_chunks_total
            .with_label_values(&[backend])
            .inc_by(chunks);
        self.stream_dropped_lines_total
            .with_label_values(&[backend])
            .inc_by(dropped_lines);
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_requests.dec();
    }
}
