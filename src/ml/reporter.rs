use crate::error::InsufficientData;
use crate::ml::classifier::{Classifier, TrainedModel};
use crate::ml::features::FEATURE_NAMES;
use crate::ml::models::{EvaluationMetrics, LabelRule};
use crate::ml::registry::ModelRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Description of the published model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub trained_at: DateTime<Utc>,
    pub hyperparameters: BTreeMap<String, String>,
    pub feature_names: Vec<String>,
    pub label_rule: LabelRule,
}

/// Read-only view over the published model's evaluation
#[derive(Clone)]
pub struct MetricsReporter {
    registry: Arc<ModelRegistry>,
}

impl MetricsReporter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Metrics of the published model, or why there is none yet.
    ///
    /// `current_samples` reports the sample count of the last rejected
    /// training attempt, or 0 if training was never attempted.
    pub fn get_metrics(&self) -> Result<EvaluationMetrics, InsufficientData> {
        match self.registry.current() {
            Some(trained) => Ok(trained.metrics.clone()),
            None => {
                let current_samples = self
                    .registry
                    .last_rejection()
                    .map_or(0, |r| r.current_samples);
                Err(InsufficientData::not_trained(current_samples))
            }
        }
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.registry.current().map(|trained| ModelInfo::from_trained(&trained))
    }
}

impl ModelInfo {
    pub fn from_trained(trained: &TrainedModel) -> Self {
        let metadata = trained.model.metadata();
        Self {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            description: metadata.description(),
            trained_at: metadata.trained_at,
            hyperparameters: metadata.hyperparameters.clone(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            label_rule: trained.label_rule.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_reports_zero_samples() {
        let reporter = MetricsReporter::new(Arc::new(ModelRegistry::new()));
        let err = reporter.get_metrics().unwrap_err();
        assert_eq!(err.error, "Model not trained");
        assert_eq!(err.current_samples, 0);
        assert!(reporter.model_info().is_none());
    }

    #[test]
    fn test_untrained_reports_last_rejection() {
        let registry = Arc::new(ModelRegistry::new());
        registry.record_rejection(InsufficientData::below_minimum(6, 10));

        let reporter = MetricsReporter::new(registry);
        assert_eq!(reporter.get_metrics().unwrap_err().current_samples, 6);
    }
}
