pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::chatbot::Chatbot;
use crate::ml::{MetricsReporter, ModelRegistry, ModelTrainer, PredictionService};
use crate::state::AssetStore;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AssetStore>,
    pub registry: Arc<ModelRegistry>,
    pub trainer: Arc<ModelTrainer>,
    pub predictions: PredictionService,
    pub reporter: MetricsReporter,
    pub chatbot: Arc<Chatbot>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every service around one store and one model registry
    pub fn new(store: Arc<dyn AssetStore>, trainer: Arc<ModelTrainer>, registry: Arc<ModelRegistry>) -> Self {
        let predictions = PredictionService::new(store.clone(), registry.clone());
        let chatbot = Arc::new(Chatbot::new(store.clone(), predictions.clone()));

        Self {
            reporter: MetricsReporter::new(registry.clone()),
            store,
            registry,
            trainer,
            predictions,
            chatbot,
            started_at: Instant::now(),
        }
    }
}
