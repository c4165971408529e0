// Prometheus metrics for the execution service

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "piston_jobs_total",
        "Submissions handled, by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref JOB_DURATION: Histogram = register_histogram!(
        "piston_job_duration_seconds",
        "Wall-clock time from submission to response",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();
    pub static ref JOBS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "piston_jobs_in_flight",
        "Submissions currently being executed"
    )
    .unwrap();
}

pub fn record_outcome(outcome: &str) {
    JOBS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Keeps the in-flight gauge honest even if the request future is dropped
pub struct InFlight;

impl InFlight {
    pub fn start() -> Self {
        JOBS_IN_FLIGHT.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        JOBS_IN_FLIGHT.dec();
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
