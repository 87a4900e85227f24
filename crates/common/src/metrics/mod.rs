//! Metrics and observability utilities
//!
//! Prometheus metrics with SLO-aligned histograms and standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all FlowLLM metrics
pub const METRICS_PREFIX: &str = "flowllm";

/// Histogram buckets for API request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for upstream model calls and whole turns (typically slower)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
    30.00, // 30s
    60.00, // turn deadline
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_stage_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Enrichment stage runs by stage and outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Enrichment stage latency in seconds"
    );

    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Streamed generations by finish state"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Streamed generation latency in seconds"
    );

    describe_counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Tool calls requested by the model"
    );

    describe_counter!(
        format!("{}_persistence_total", METRICS_PREFIX),
        Unit::Count,
        "Conversation persistence attempts by outcome"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one enrichment stage run. Outcome is `ok`, `empty`, `degraded` or `timeout`.
pub fn record_stage(stage: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_stage_runs_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Record the end of a streamed generation
pub fn record_generation(finish: &str, duration_secs: f64) {
    counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        "finish" => finish.to_string()
    )
    .increment(1);

    histogram!(format!("{}_generation_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record a tool call, executed or ignored
pub fn record_tool_call(tool: &str, executed: bool) {
    counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "executed" => executed.to_string()
    )
    .increment(1);
}

/// Record a persistence attempt
pub fn record_persistence(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_persistence_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Record an embedding call (after retries)
pub fn record_embedding(provider: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "provider" => provider.to_string()
        )
        .record(duration_secs);
    }
}

/// Record a cache lookup
pub fn record_cache(cache_name: &str, hit: bool) {
    let name = if hit { "hits" } else { "misses" };
    counter!(
        format!("{}_cache_{}_total", METRICS_PREFIX, name),
        "cache" => cache_name.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, GENERATION_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
        assert!(GENERATION_BUCKETS.contains(&60.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        let metrics = RequestMetrics::start("POST", "/chat");
        metrics.finish(200);
        record_stage("rag", "ok", 0.2);
        record_generation("stop", 1.5);
        record_tool_call("addMemory", true);
        record_persistence(false);
        record_embedding("mock", 0.01, true);
        record_cache("embedding", false);
    }
}
