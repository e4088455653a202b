use std::sync::Arc;
use std::time::Duration;
use tlamp_risk::{
    api::{build_router_with_timeouts, AppState},
    config::Config,
    ml::{ModelRegistry, ModelTrainer},
    state::create_store,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_tracing(&config);

    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Failed to load configuration, using defaults");
    }

    tracing::info!("Starting {} v{}", config.observability.service_name, env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = tlamp_risk::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    // Initialize storage backend
    tracing::info!("Storage backend: {:?}", config.state.backend);
    let store = create_store(&config.state).await?;
    tracing::info!("✅ Storage backend initialized");

    // Risk model
    let registry = Arc::new(ModelRegistry::new());
    let trainer = Arc::new(ModelTrainer::new(config.ml.clone(), store.clone(), registry.clone()));
    trainer.initialize().await?;
    if registry.is_trained() {
        tracing::info!("✅ Risk model ready");
    } else {
        tracing::info!("⚠️  Risk model not trained yet");
    }

    let app_state = AppState::new(store, trainer, registry);
    let app = build_router_with_timeouts(
        app_state,
        Duration::from_secs(config.server.request_timeout_secs),
        Duration::from_secs(config.server.training_timeout_secs),
    );

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("🚀 HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Predictions: http://{}/api/ai/predictive-maintenance", http_addr);
    tracing::info!("   Metrics: http://{}/metrics", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(http_listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tlamp_risk={},tower_http=info", config.observability.log_level).into()
    });

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
