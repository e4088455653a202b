//! HTTP middleware recording request count and latency per matched route
use super::*;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Route label for requests no route matched
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Axum middleware function for metrics collection
///
/// Use with `axum::middleware::from_fn(track_metrics)`.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    // Scrapes are not interesting traffic
    if path == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    if status.is_server_error() {
        ERRORS_TOTAL
            .with_label_values(&["http", status.as_str()])
            .inc();
    }

    response
}
