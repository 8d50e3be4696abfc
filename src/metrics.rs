use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref SERVICE_UP: IntGauge = register_int_gauge!(
        "iot_service_up",
        "Whether the service is up (1) or down (0)"
    ).unwrap();

    // Request metrics
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "iot_request_duration_seconds",
        "Request duration in seconds",
        &["endpoint"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();

    // Store metrics
    pub static ref POINTS_WRITTEN: IntCounter = register_int_counter!(
        "iot_points_written_total",
        "Total number of points accepted by the store"
    ).unwrap();

    pub static ref WRITE_FAILURES: IntCounter = register_int_counter!(
        "iot_write_failures_total",
        "Total number of point writes that failed"
    ).unwrap();

    pub static ref QUERIES: IntCounter = register_int_counter!(
        "iot_queries_total",
        "Total number of range queries executed"
    ).unwrap();

    pub static ref QUERY_FAILURES: IntCounter = register_int_counter!(
        "iot_query_failures_total",
        "Total number of range queries that failed"
    ).unwrap();

    // Simulator metrics
    pub static ref SIMULATED_READINGS: IntCounterVec = register_int_counter_vec!(
        "iot_simulated_readings_total",
        "Readings submitted by virtual devices",
        &["device_id", "outcome"]
    ).unwrap();
}

/// Registers every metric up front so the first scrape lists them all.
pub fn init_metrics() {
    lazy_static::initialize(&REQUEST_DURATION);
    lazy_static::initialize(&POINTS_WRITTEN);
    lazy_static::initialize(&WRITE_FAILURES);
    lazy_static::initialize(&QUERIES);
    lazy_static::initialize(&QUERY_FAILURES);
    lazy_static::initialize(&SIMULATED_READINGS);
    SERVICE_UP.set(1);
}

/// Observes the lifetime of one request into [`REQUEST_DURATION`].
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        REQUEST_DURATION
            .with_label_values(&[self.endpoint])
            .observe(duration);
    }
}

pub fn record_write(ok: bool) {
    if ok {
        POINTS_WRITTEN.inc();
    } else {
        WRITE_FAILURES.inc();
    }
}

pub fn record_query(ok: bool) {
    QUERIES.inc();
    if !ok {
        QUERY_FAILURES.inc();
    }
}

pub fn record_simulated_reading(device_id: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    SIMULATED_READINGS
        .with_label_values(&[device_id, outcome])
        .inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
