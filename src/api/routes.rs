use crate::api::{handlers, AppState};
use crate::metrics::track_metrics;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Request timeout applied when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of the synchronous training endpoint when none is configured
pub const DEFAULT_TRAINING_TIMEOUT: Duration = Duration::from_secs(600);

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    build_router_with_timeouts(state, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TRAINING_TIMEOUT)
}

/// Build the router with explicit timeouts.
///
/// Training runs inside the request, so its route carries its own timeout
/// instead of the general one.
pub fn build_router_with_timeouts(
    state: AppState,
    request_timeout: Duration,
    training_timeout: Duration,
) -> Router {
    let training = Router::new()
        .route("/api/ai/train-model", post(handlers::train_model))
        .layer(TimeoutLayer::new(training_timeout));

    Router::new()
        // Health and scraping
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Risk model
        .route("/api/ai/predictive-maintenance", get(handlers::predictive_maintenance))
        .route("/api/ai/model-metrics", get(handlers::model_metrics))
        .route("/api/ai/model-info", get(handlers::model_info))
        .route("/api/ai/chatbot", post(handlers::chatbot))
        // Asset records
        .route(
            "/transmission-lines",
            get(handlers::list_lines).post(handlers::create_line),
        )
        .route(
            "/transmission-lines/:id",
            get(handlers::get_line)
                .put(handlers::update_line)
                .delete(handlers::delete_line),
        )
        .route(
            "/tripping-incidents",
            get(handlers::list_incidents).post(handlers::create_incident),
        )
        .route(
            "/tripping-incidents/:id",
            get(handlers::get_incident).delete(handlers::delete_incident),
        )
        .route(
            "/tower-locations",
            get(handlers::list_towers).post(handlers::create_tower),
        )
        .route(
            "/tower-locations/:id",
            get(handlers::get_tower).delete(handlers::delete_tower),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .merge(training)
        .with_state(state)
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
