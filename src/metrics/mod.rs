//! Prometheus metrics for the risk service.
//!
//! All collectors live in one global registry and are exported on
//! `/metrics` in the text exposition format.

pub mod middleware;

pub use middleware::track_metrics;

use crate::ml::models::{EvaluationMetrics, RiskClass};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "tlamp";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Prediction Metrics
    // ============================================================================

    /// Lines scored, by predicted risk class
    ///
    /// Labels: risk
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of line risk predictions")
            .namespace(NAMESPACE),
        &["risk"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Lines skipped because features could not be derived
    ///
    /// Labels: stage (training, prediction)
    pub static ref LINES_SKIPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("lines_skipped_total", "Lines skipped during feature extraction")
            .namespace(NAMESPACE),
        &["stage"]
    ).expect("Failed to create LINES_SKIPPED_TOTAL metric");

    // ============================================================================
    // Training Metrics
    // ============================================================================

    /// Training attempts by outcome
    ///
    /// Labels: outcome (trained, insufficient_data, failed)
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of model training attempts")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    /// Wall time of successful training runs
    pub static ref TRAINING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "training_duration_seconds",
            "Model training duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).expect("Failed to create TRAINING_DURATION_SECONDS metric");

    /// Test-set accuracy of the published model
    pub static ref MODEL_ACCURACY: Gauge = Gauge::with_opts(
        Opts::new("model_accuracy", "Test accuracy of the published model")
            .namespace(NAMESPACE)
    ).expect("Failed to create MODEL_ACCURACY metric");

    /// Sample counts of the published model
    ///
    /// Labels: split (total, training, test)
    pub static ref MODEL_SAMPLES: GaugeVec = GaugeVec::new(
        Opts::new("model_samples", "Sample counts of the published model")
            .namespace(NAMESPACE),
        &["split"]
    ).expect("Failed to create MODEL_SAMPLES metric");

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Total number of errors
    ///
    /// Labels: component, error_type
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("errors_total", "Total number of errors")
            .namespace(NAMESPACE),
        &["component", "error_type"]
    ).expect("Failed to create ERRORS_TOTAL metric");

    /// Application build info
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Application build information")
            .namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");

    /// Chatbot queries answered
    pub static ref CHAT_QUERIES_TOTAL: Counter = Counter::with_opts(
        Opts::new("chat_queries_total", "Total number of chatbot queries")
            .namespace(NAMESPACE)
    ).expect("Failed to create CHAT_QUERIES_TOTAL metric");
}

fn register<C: prometheus::core::Collector + 'static>(collector: C) -> Result<(), prometheus::Error> {
    match PROMETHEUS_REGISTRY.register(Box::new(collector)) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    register(HTTP_REQUESTS_TOTAL.clone())?;
    register(HTTP_REQUEST_DURATION_SECONDS.clone())?;

    register(PREDICTIONS_TOTAL.clone())?;
    register(LINES_SKIPPED_TOTAL.clone())?;

    register(TRAINING_RUNS_TOTAL.clone())?;
    register(TRAINING_DURATION_SECONDS.clone())?;
    register(MODEL_ACCURACY.clone())?;
    register(MODEL_SAMPLES.clone())?;

    register(ERRORS_TOTAL.clone())?;
    register(BUILD_INFO.clone())?;
    register(CHAT_QUERIES_TOTAL.clone())?;

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Record a scored line
pub fn record_prediction(class: RiskClass) {
    PREDICTIONS_TOTAL.with_label_values(&[class.name()]).inc();
}

/// Record lines skipped at a pipeline stage
pub fn record_skipped(stage: &str, count: usize) {
    if count > 0 {
        LINES_SKIPPED_TOTAL
            .with_label_values(&[stage])
            .inc_by(count as f64);
    }
}

/// Record the outcome of a training attempt
pub fn record_training_outcome(outcome: &str) {
    TRAINING_RUNS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Update gauges after a model is published
pub fn record_published_model(metrics: &EvaluationMetrics) {
    MODEL_ACCURACY.set(metrics.accuracy);
    MODEL_SAMPLES
        .with_label_values(&["total"])
        .set(metrics.total_samples as f64);
    MODEL_SAMPLES
        .with_label_values(&["training"])
        .set(metrics.training_samples as f64);
    MODEL_SAMPLES
        .with_label_values(&["test"])
        .set(metrics.test_samples as f64);
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_prediction_counter() {
        record_prediction(RiskClass::High);
        let value = PREDICTIONS_TOTAL.with_label_values(&["high"]).get();
        assert!(value >= 1.0);
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().unwrap();
        record_training_outcome("trained");
        let metrics = gather_metrics();
        assert!(metrics.contains("tlamp_training_runs_total"));
        assert!(metrics.contains("tlamp_build_info"));
    }
}
