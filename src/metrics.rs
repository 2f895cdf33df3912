use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter, register_int_counter_vec,
};

pub static REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_requests_total",
        "Total number of requests received by the gateway"
    ))
    .expect("register gateway_requests_total")
});

pub static REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_rejections_total",
            "Requests answered by the gateway without reaching a backend"
        ),
        &["reason"]
    )
    .expect("register gateway_rejections_total")
});

pub static UPSTREAM_RESPONSES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_upstream_responses_total",
            "Backend responses by route and status class"
        ),
        &["route", "class"]
    )
    .expect("register gateway_upstream_responses_total")
});

pub static CIRCUIT_OPENED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_circuit_opened_total",
        "Number of times the circuit breaker opened"
    ))
    .expect("register gateway_circuit_opened_total")
});

pub static UPSTREAM_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_upstream_latency_seconds",
        "Time spent waiting for backend responses",
        &["route"]
    )
    .expect("register gateway_upstream_latency_seconds")
});

/// "2xx", "4xx", ... for a status code
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
