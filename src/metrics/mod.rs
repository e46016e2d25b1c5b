//! Prometheus metrics for the herald pipeline
//!
//! This module provides metrics tracking for:
//! - Pipeline: stage runs, skipped runs, stage duration, per-task outcomes
//! - Platforms: publish outcomes and attempts per platform
//! - API: request counts and latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for stage and task metrics
struct PipelineMetrics {
    stage_runs: CounterVec,
    stage_duration: HistogramVec,
    stage_running: GaugeVec,
    task_outcomes: CounterVec,
}

/// Container for platform and API metrics
struct PublishMetrics {
    publish_outcomes: CounterVec,
    publish_attempts: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

static PUBLISH_METRICS: OnceLock<PublishMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails, subsequent metric
/// operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = herald::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let pipeline = PipelineMetrics {
        stage_runs: register_counter_vec!(
            "herald_stage_runs_total",
            "Stage invocations by result (completed, skipped)",
            &["stage", "result"]
        )?,
        stage_duration: register_histogram_vec!(
            "herald_stage_duration_seconds",
            "Time spent in a stage run in seconds",
            &["stage"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
        )?,
        stage_running: register_gauge_vec!(
            "herald_stage_running",
            "Whether a stage is currently running (1 = yes, 0 = no)",
            &["stage"]
        )?,
        task_outcomes: register_counter_vec!(
            "herald_task_outcomes_total",
            "Per-task outcomes by stage",
            &["stage", "outcome"]
        )?,
    };

    let publish = PublishMetrics {
        publish_outcomes: register_counter_vec!(
            "herald_platform_publish_total",
            "Platform publish outcomes",
            &["platform", "result"]
        )?,
        publish_attempts: register_counter_vec!(
            "herald_platform_publish_attempts_total",
            "Calls made to platform APIs including retries",
            &["platform"]
        )?,
        api_requests: register_counter_vec!(
            "herald_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "herald_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    PIPELINE_METRICS.set(pipeline).map_err(|_| "Pipeline metrics already initialized")?;
    PUBLISH_METRICS.set(publish).map_err(|_| "Publish metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PIPELINE_METRICS.get().is_some() && PUBLISH_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a stage timer
pub fn start_stage_timer(stage: &str) -> MetricsTimer {
    match PIPELINE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.stage_duration.with_label_values(&[stage]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record a stage invocation
pub fn record_stage_run(stage: &str, skipped: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        let result = if skipped { "skipped" } else { "completed" };
        m.stage_runs.with_label_values(&[stage, result]).inc();
    }
}

/// Update the running gauge of a stage
pub fn set_stage_running(stage: &str, running: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.stage_running
            .with_label_values(&[stage])
            .set(if running { 1.0 } else { 0.0 });
    }
}

/// Record per-task outcomes of one stage run
pub fn record_task_outcome(stage: &str, outcome: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.task_outcomes.with_label_values(&[stage, outcome]).inc();
    }
}

/// Record one platform publish
pub fn record_platform_publish(platform: &str, success: bool, attempts: u32) {
    let Some(m) = PUBLISH_METRICS.get() else {
        return;
    };

    let result = if success { "success" } else { "failure" };
    m.publish_outcomes.with_label_values(&[platform, result]).inc();

    if attempts > 0 {
        m.publish_attempts
            .with_label_values(&[platform])
            .inc_by(f64::from(attempts));
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = PUBLISH_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_stage_run("schedule", false);

        let text = encode_metrics().unwrap();
        assert!(text.contains("herald_stage_runs_total"));
    }

    #[test]
    fn test_pipeline_metrics() {
        ensure_metrics_initialized();
        set_stage_running("generate", true);
        record_task_outcome("generate", "advanced");
        record_stage_run("generate", true);
        set_stage_running("generate", false);
    }

    #[test]
    fn test_platform_and_api_metrics() {
        ensure_metrics_initialized();
        record_platform_publish("facebook", true, 1);
        record_platform_publish("instagram", false, 4);
        record_api_request("/api/health", 200, 0.005);
    }

    #[test]
    fn test_stage_timer() {
        ensure_metrics_initialized();
        let _timer = start_stage_timer("publish");
    }
}
