use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Session lifecycle
    pub static ref LIVE_SESSION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "live_session_transitions_total",
        "Live quiz status transitions",
        &["to", "trigger"]
    )
    .unwrap();

    pub static ref LIVE_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "live_sessions_active",
        "Number of quizzes currently live"
    )
    .unwrap();

    // Realtime
    pub static ref REALTIME_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "realtime_connections_active",
        "Number of open realtime sockets"
    )
    .unwrap();

    pub static ref ROOM_BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "room_broadcasts_total",
        "Events broadcast to rooms",
        &["event"]
    )
    .unwrap();

    pub static ref ROSTER_PRUNED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "roster_pruned_total",
        "Participants removed after disconnect grace expired",
        &["kind"]
    )
    .unwrap();

    // Answers
    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Answer submissions",
        &["kind", "outcome"]
    )
    .unwrap();

    pub static ref SCHEDULER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "scheduler_ticks_total",
        "Total number of session scheduler ticks",
        &["status"]
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

pub fn record_transition(to: &str, trigger: &str) {
    LIVE_SESSION_TRANSITIONS_TOTAL
        .with_label_values(&[to, trigger])
        .inc();
}
