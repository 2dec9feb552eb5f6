use axum::{http::StatusCode, routing};
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_counter_vec, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::net::SocketAddr;

pub const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.000_01, // 10 us
    0.000_05, // 50 us
    0.000_1,  // 0.1 ms
    0.000_5,  // 0.5 ms
    0.001_0,  // 1   ms
    0.005_0,  // 5   ms
    0.010_0,  // 10  ms
    0.050_0,  // 50  ms
    0.100_0,  // 100 ms
];

pub static DNS_REQUESTS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "dns_requests_total",
        "Total number of DNS datagrams received, whether valid or invalid."
    ))
    .unwrap()
});

pub static DNS_REQUESTS_DROPPED_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!(
                "dns_requests_dropped_total",
                "Total number of DNS datagrams which got no response."
            ),
            &["reason"]
        )
        .unwrap()
    });

pub static DNS_RESPONSES_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!("dns_responses_total", "Total number of DNS responses sent."),
            &["kind"]
        )
        .unwrap()
    });

pub static DNS_RESPONSE_TIME_SECONDS: std::sync::LazyLock<Histogram> =
    std::sync::LazyLock::new(|| {
        register_histogram!(
            "dns_response_time_seconds",
            "Time spent decoding, deciding, and encoding each datagram.",
            RESPONSE_TIME_BUCKETS.to_vec()
        )
        .unwrap()
    });

async fn get_metrics() -> (StatusCode, String) {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(metrics_str) => (StatusCode::OK, metrics_str),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn serve_prometheus_endpoint_task(address: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route("/metrics", routing::get(get_metrics));
    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
