use crate::error::{AppError, InsufficientData, Result};
use crate::metrics;
use crate::ml::classifier::{Classifier, RiskModel, TrainedModel};
use crate::ml::features::{FeatureExtractor, FeatureVector};
use crate::ml::models::{
    calculate_metrics, ranked_importance, EvaluationMetrics, MLConfig, TrainingDataset,
};
use crate::ml::registry::ModelRegistry;
use crate::models::{TowerLocation, TransmissionLine, TrippingIncident};
use crate::state::{AssetStore, IncidentFilter, LineFilter, TowerFilter};
use chrono::{NaiveDate, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Trains the risk model from the asset store and publishes it.
///
/// Only one training run executes at a time. A run that fails for any
/// reason leaves the previously published model in place.
pub struct ModelTrainer {
    config: MLConfig,
    store: Arc<dyn AssetStore>,
    registry: Arc<ModelRegistry>,
    training_lock: Mutex<()>,
}

impl ModelTrainer {
    pub fn new(config: MLConfig, store: Arc<dyn AssetStore>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
            training_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MLConfig {
        &self.config
    }

    /// Train on everything in the store as of today
    pub async fn train_all(&self) -> Result<EvaluationMetrics> {
        self.train_all_as_of(Utc::now().date_naive()).await
    }

    /// Train on everything in the store as of `as_of`
    pub async fn train_all_as_of(&self, as_of: NaiveDate) -> Result<EvaluationMetrics> {
        let _guard = self.training_lock.lock().await;
        let started = Instant::now();

        info!(%as_of, "🧠 Training risk model");

        let lines = self.store.list_lines(&LineFilter::default()).await?;
        let incidents = self.store.list_incidents(&IncidentFilter::default()).await?;
        let towers = self.store.list_towers(&TowerFilter::default()).await?;

        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            fit_and_evaluate(&config, &lines, &incidents, &towers, as_of)
        })
        .await
        .map_err(|e| AppError::Training(format!("training task aborted: {}", e)))?;

        let trained = match outcome {
            Ok(trained) => trained,
            Err(AppError::InsufficientSamples(rejection)) => {
                warn!(
                    current_samples = rejection.current_samples,
                    required = self.config.min_training_samples,
                    "Not enough samples to train; keeping the current model"
                );
                metrics::record_training_outcome("insufficient_data");
                self.registry.record_rejection(rejection.clone());
                return Err(AppError::InsufficientSamples(rejection));
            }
            Err(e) => {
                error!(error = %e, "Model training failed; keeping the current model");
                metrics::record_training_outcome("failed");
                return Err(e);
            }
        };

        if let Some(path) = &self.config.model_path {
            if let Err(e) = trained.save(Path::new(path)) {
                error!(error = %e, path = %path, "Failed to persist model; keeping the current model");
                metrics::record_training_outcome("failed");
                return Err(e);
            }
        }

        let evaluation = trained.metrics.clone();
        self.registry.publish(Arc::new(trained));

        metrics::record_training_outcome("trained");
        metrics::record_published_model(&evaluation);
        metrics::TRAINING_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        info!(
            accuracy = evaluation.accuracy,
            f1_score = evaluation.f1_score,
            total_samples = evaluation.total_samples,
            skipped_lines = evaluation.skipped_lines,
            "✅ Risk model trained and published"
        );

        Ok(evaluation)
    }

    /// Publish the persisted artifact, if one exists. Returns whether a
    /// model was loaded.
    pub fn load_persisted(&self) -> Result<bool> {
        let Some(path) = &self.config.model_path else {
            return Ok(false);
        };
        let path = Path::new(path);
        if !path.exists() {
            return Ok(false);
        }

        let trained = TrainedModel::load(path)?;
        info!(
            path = %path.display(),
            trained_at = %trained.model.metadata().trained_at,
            "📦 Loaded persisted risk model"
        );
        metrics::record_published_model(&trained.metrics);
        self.registry.publish(Arc::new(trained));
        Ok(true)
    }

    /// Startup hook: load the artifact, or train once when configured to
    pub async fn initialize(&self) -> Result<()> {
        match self.load_persisted() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable model artifact"),
        }

        if !self.config.train_on_startup {
            info!("No trained model available; train via POST /api/ai/train-model");
            return Ok(());
        }

        match self.train_all().await {
            Ok(_) => Ok(()),
            Err(AppError::InsufficientSamples(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Build the dataset, fit on the training split and evaluate on the test
/// split. Pure apart from logging; nothing is published here.
pub fn fit_and_evaluate(
    config: &MLConfig,
    lines: &[TransmissionLine],
    incidents: &[TrippingIncident],
    towers: &[TowerLocation],
    as_of: NaiveDate,
) -> Result<TrainedModel> {
    if !(config.test_fraction > 0.0 && config.test_fraction < 1.0) {
        return Err(AppError::Configuration(format!(
            "ml.test_fraction must be in (0, 1), got {}",
            config.test_fraction
        )));
    }

    let extractor = FeatureExtractor::new(config.recent_window_days);
    let batch = extractor.extract_all(lines, incidents, towers, as_of);
    let skipped_lines = batch.skipped.len();
    if skipped_lines > 0 {
        warn!(skipped_lines, "Lines skipped during training feature extraction");
        metrics::record_skipped("training", skipped_lines);
    }

    let samples: Vec<(u64, FeatureVector)> = batch
        .rows
        .iter()
        .map(|(line, features)| (line.id, *features))
        .collect();

    let minimum = config.min_training_samples.max(2);
    if samples.len() < minimum {
        return Err(AppError::InsufficientSamples(InsufficientData::below_minimum(
            samples.len(),
            minimum,
        )));
    }

    let dataset = TrainingDataset::from_samples(&samples, &config.labels);
    let (train, test) = dataset.stratified_split(config.test_fraction, config.random_seed);

    let model = RiskModel::fit(&train, &config.forest, config.random_seed, extractor)?;
    let predicted = model.predict_dataset(&test)?;
    let report = calculate_metrics(&test.labels, &predicted);

    let evaluation = EvaluationMetrics {
        accuracy: report.accuracy,
        precision: report.precision,
        recall: report.recall,
        f1_score: report.f1_score,
        risk_distribution: dataset.distribution(),
        feature_importance: ranked_importance(model.feature_importances()),
        total_samples: dataset.n_samples(),
        training_samples: train.n_samples(),
        test_samples: test.n_samples(),
        confusion_matrix: report.confusion_matrix,
        per_class: report.per_class,
        skipped_lines,
        trained_at: model.metadata().trained_at,
    };

    Ok(TrainedModel {
        model,
        metrics: evaluation,
        label_rule: config.labels.clone(),
    })
}
