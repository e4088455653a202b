use crate::error::{AppError, Result};
use crate::ml::artifact;
use crate::ml::features::{FeatureExtractor, FeatureVector, FEATURE_NAMES};
use crate::ml::forest::{argmax, ForestParams, RandomForest};
use crate::ml::models::{
    EvaluationMetrics, LabelRule, ModelMetadata, RiskClass, RiskScore, TrainingDataset,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trait for risk classifiers
pub trait Classifier: Send + Sync {
    /// Score one feature vector
    fn predict(&self, features: &FeatureVector) -> Result<RiskScore>;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;

    /// Extractor the model was trained with
    fn extractor(&self) -> &FeatureExtractor;
}

/// Random-forest risk model together with the feature settings it was fit on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskModel {
    forest: RandomForest,
    extractor: FeatureExtractor,
    metadata: ModelMetadata,
}

impl RiskModel {
    /// Fit a brand-new model on `train`
    pub fn fit(
        train: &TrainingDataset,
        params: &ForestParams,
        seed: u64,
        extractor: FeatureExtractor,
    ) -> Result<Self> {
        let forest = RandomForest::fit(
            train.features.view(),
            &train.label_indices(),
            RiskClass::COUNT,
            params,
            seed,
        )?;

        let metadata = ModelMetadata::new(
            params,
            seed,
            extractor.recent_window_days(),
            train.n_samples(),
        );

        Ok(Self {
            forest,
            extractor,
            metadata,
        })
    }

    /// Predicted class of every row in `dataset`
    pub fn predict_dataset(&self, dataset: &TrainingDataset) -> Result<Vec<RiskClass>> {
        dataset
            .features
            .rows()
            .into_iter()
            .map(|row| {
                let values = row.to_vec();
                let index = self.forest.predict(&values)?;
                RiskClass::from_index(index)
                    .ok_or_else(|| AppError::Internal(format!("forest produced class {}", index)))
            })
            .collect()
    }

    /// Normalized impurity importances in feature order
    pub fn feature_importances(&self) -> &[f64] {
        self.forest.feature_importances()
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }
}

impl Classifier for RiskModel {
    fn predict(&self, features: &FeatureVector) -> Result<RiskScore> {
        features.validate()?;
        let values = features.to_array();

        let proba = self.forest.predict_proba(&values)?;
        let probabilities = [proba[0], proba[1], proba[2]];
        let best = argmax(&probabilities);
        let class = RiskClass::from_index(best)
            .ok_or_else(|| AppError::Internal(format!("forest produced class {}", best)))?;

        Ok(RiskScore {
            class,
            probability: probabilities[best],
            probabilities,
        })
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}

/// Everything one successful training run produced.
///
/// Published as a unit so metrics and weights always come from the same run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainedModel {
    pub model: RiskModel,
    pub metrics: EvaluationMetrics,
    pub label_rule: LabelRule,
}

impl TrainedModel {
    /// Persist the artifact (atomic replace)
    pub fn save(&self, path: &Path) -> Result<()> {
        artifact::write_artifact(path, self)
    }

    /// Load a previously saved artifact
    pub fn load(path: &Path) -> Result<Self> {
        let model: TrainedModel = artifact::read_artifact(path)?;
        if model.model.forest.n_classes() != RiskClass::COUNT
            || model.model.forest.n_features() != FEATURE_NAMES.len()
        {
            return Err(AppError::Serialization(format!(
                "artifact {} has an incompatible shape",
                path.display()
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureError;
    use crate::ml::models::{calculate_metrics, RiskDistribution};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fv(recent: u32, age: f64) -> FeatureVector {
        FeatureVector {
            total_length_km: 120.0,
            line_age: age,
            incident_count: recent + 1,
            recent_incidents: recent,
            tower_count: 40,
            poor_tower_count: 0,
            voltage_encoded: 2,
        }
    }

    fn dataset() -> TrainingDataset {
        let samples: Vec<(u64, FeatureVector)> = (0..30)
            .map(|i| {
                let recent = match i % 3 {
                    0 => 0,
                    1 => 5,
                    _ => 14,
                };
                (i as u64, fv(recent, 10.0 + (i % 7) as f64))
            })
            .collect();
        TrainingDataset::from_samples(&samples, &LabelRule::default())
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_and_predict() {
        let model = RiskModel::fit(&dataset(), &small_params(), 42, FeatureExtractor::default()).unwrap();

        let score = model.predict(&fv(14, 12.0)).unwrap();
        assert_eq!(score.class, RiskClass::High);
        assert!(score.probability >= 0.5);
        assert!((score.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);

        let score = model.predict(&fv(0, 12.0)).unwrap();
        assert_eq!(score.class, RiskClass::Low);
        assert_eq!(model.metadata().n_training_samples, 30);
    }

    #[test]
    fn test_predict_rejects_invalid_features() {
        let model = RiskModel::fit(&dataset(), &small_params(), 42, FeatureExtractor::default()).unwrap();

        let mut bad = fv(1, 5.0);
        bad.line_age = f64::NAN;
        assert!(matches!(model.predict(&bad), Err(AppError::FeatureExtraction(_))));

        bad.line_age = -2.0;
        assert!(matches!(model.predict(&bad), Err(AppError::FeatureExtraction(_))));
    }

    #[test]
    fn test_predict_rejects_out_of_range_voltage() {
        let model = RiskModel::fit(&dataset(), &small_params(), 42, FeatureExtractor::default()).unwrap();

        let mut bad = fv(0, 12.0);
        bad.voltage_encoded = 200;
        let err = model.predict(&bad).unwrap_err();
        assert!(matches!(
            err,
            AppError::FeatureExtraction(FeatureError::OutOfRange {
                feature: "voltage_encoded",
                ..
            })
        ));
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_predict_rejects_more_recent_than_total_incidents() {
        let model = RiskModel::fit(&dataset(), &small_params(), 42, FeatureExtractor::default()).unwrap();

        let mut bad = fv(5, 12.0);
        bad.recent_incidents = 50;
        bad.incident_count = 3;
        assert!(matches!(
            model.predict(&bad),
            Err(AppError::FeatureExtraction(FeatureError::OutOfRange {
                feature: "recent_incidents",
                ..
            }))
        ));
    }

    #[test]
    fn test_predict_dataset_matches_single_predictions() {
        let data = dataset();
        let model = RiskModel::fit(&data, &small_params(), 1, FeatureExtractor::default()).unwrap();
        let predicted = model.predict_dataset(&data).unwrap();
        assert_eq!(predicted.len(), data.n_samples());

        let report = calculate_metrics(&data.labels, &predicted);
        assert!(report.accuracy > 0.9);
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let data = dataset();
        let model = RiskModel::fit(&data, &small_params(), 42, FeatureExtractor::new(365)).unwrap();
        let trained = TrainedModel {
            model,
            metrics: EvaluationMetrics {
                accuracy: 1.0,
                precision: 1.0,
                recall: 1.0,
                f1_score: 1.0,
                risk_distribution: RiskDistribution::default(),
                feature_importance: Vec::new(),
                total_samples: 30,
                training_samples: 24,
                test_samples: 6,
                confusion_matrix: vec![vec![0; 3]; 3],
                per_class: BTreeMap::new(),
                skipped_lines: 0,
                trained_at: chrono::Utc::now(),
            },
            label_rule: LabelRule::default(),
        };

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("risk_model.bin");
        trained.save(&path).unwrap();
        let loaded = TrainedModel::load(&path).unwrap();

        assert_eq!(loaded, trained);
        assert_eq!(loaded.model.extractor().recent_window_days(), 365);
        for recent in [0, 3, 7, 11, 20] {
            let a = trained.model.predict(&fv(recent, 25.0)).unwrap();
            let b = loaded.model.predict(&fv(recent, 25.0)).unwrap();
            assert_eq!(a.probabilities, b.probabilities);
            assert_eq!(a.class, b.class);
        }
    }
}
