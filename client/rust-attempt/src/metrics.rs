use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Remote attempt API
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lms_api_requests_total",
        "Total number of attempt API requests",
        &["endpoint", "status"]
    )
    .unwrap();

    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "lms_api_request_duration_seconds",
        "Attempt API request duration in seconds",
        &["endpoint"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Attempt flow
    pub static ref ATTEMPT_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "lms_attempt_sessions_active",
        "Number of attempt sessions currently running"
    )
    .unwrap();

    pub static ref AUTOSAVES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lms_autosaves_total",
        "Autosave flushes by outcome",
        &["status"]
    )
    .unwrap();

    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lms_submissions_total",
        "Attempt submissions by trigger and outcome",
        &["trigger", "status"]
    )
    .unwrap();

    pub static ref PRACTICE_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lms_practice_checks_total",
        "Practice answer checks by source",
        &["source"]
    )
    .unwrap();

    // Notification channel
    pub static ref NOTIFICATION_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        "lms_notification_reconnects_total",
        "Number of notification channel reconnect attempts"
    )
    .unwrap();

    pub static ref NOTIFICATION_FRAMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lms_notification_frames_total",
        "STOMP frames received by command",
        &["command"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track an attempt API call with metrics
pub async fn track_api_call<F, T, E>(endpoint: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    API_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status])
        .inc();

    API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(duration);

    result
}
