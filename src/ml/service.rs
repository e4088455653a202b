use crate::error::{AppError, Result};
use crate::metrics;
use crate::ml::classifier::{Classifier, TrainedModel};
use crate::ml::models::RiskPrediction;
use crate::ml::registry::ModelRegistry;
use crate::state::{AssetStore, IncidentFilter, LineFilter, TowerFilter};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Predictions for every active line, scored by one model snapshot
#[derive(Debug, Clone)]
pub struct PredictionBatch {
    pub predictions: Vec<RiskPrediction>,

    /// Active lines that could not be scored
    pub skipped: usize,

    pub generated_at: DateTime<Utc>,

    /// The model that produced these predictions
    pub model: Arc<TrainedModel>,
}

/// Scores active transmission lines with the published model
#[derive(Clone)]
pub struct PredictionService {
    store: Arc<dyn AssetStore>,
    registry: Arc<ModelRegistry>,
}

impl PredictionService {
    pub fn new(store: Arc<dyn AssetStore>, registry: Arc<ModelRegistry>) -> Self {
        Self { store, registry }
    }

    /// Risk predictions for all active lines as of today, in no particular order
    pub async fn predict_all(&self) -> Result<Vec<RiskPrediction>> {
        Ok(self.predict_batch(Utc::now().date_naive()).await?.predictions)
    }

    /// Risk predictions for all active lines as of `as_of`
    pub async fn predict_all_as_of(&self, as_of: NaiveDate) -> Result<Vec<RiskPrediction>> {
        Ok(self.predict_batch(as_of).await?.predictions)
    }

    /// Score all active lines with a single model snapshot.
    ///
    /// Lines whose features cannot be derived are skipped and counted.
    pub async fn predict_batch(&self, as_of: NaiveDate) -> Result<PredictionBatch> {
        let trained = self.registry.current().ok_or(AppError::ModelNotTrained)?;

        let lines = self.store.list_lines(&LineFilter::active()).await?;
        let incidents = self.store.list_incidents(&IncidentFilter::default()).await?;
        let towers = self.store.list_towers(&TowerFilter::default()).await?;

        let batch = trained
            .model
            .extractor()
            .extract_all(&lines, &incidents, &towers, as_of);
        let mut skipped = batch.skipped.len();

        let mut predictions = Vec::with_capacity(batch.rows.len());
        for (line, features) in batch.rows {
            match trained.model.predict(&features) {
                Ok(score) => {
                    metrics::record_prediction(score.class);
                    predictions.push(RiskPrediction {
                        line_id: line.id,
                        line_name: line.line_name.clone(),
                        voltage_level: line.voltage_level,
                        line_age: features.line_age,
                        recent_incidents: features.recent_incidents,
                        predicted_risk: score.class,
                        risk_probability: score.probability,
                    });
                }
                Err(e) => {
                    debug!(line_id = line.id, error = %e, "Skipping unscorable line");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, "Active lines skipped during prediction");
            metrics::record_skipped("prediction", skipped);
        }

        Ok(PredictionBatch {
            predictions,
            skipped,
            generated_at: Utc::now(),
            model: trained,
        })
    }
}
