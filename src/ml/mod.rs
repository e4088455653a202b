//! Predictive-maintenance risk model for transmission lines
//!
//! This module provides:
//! - Feature derivation from line, incident and tower records
//! - A random-forest classifier with impurity-based feature importance
//! - Training with a stratified split and test-set evaluation
//! - Atomic publication and persistence of trained models
//! - Batch scoring of active lines

pub mod artifact;
pub mod classifier;
pub mod features;
pub mod forest;
pub mod models;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod trainer;

pub use classifier::{Classifier, RiskModel, TrainedModel};
pub use features::{FeatureError, FeatureExtractor, FeatureVector, FEATURE_NAMES};
pub use forest::{ForestError, ForestParams, RandomForest};
pub use models::{
    EvaluationMetrics, FeatureImportance, LabelRule, MLConfig, ModelMetadata, RiskClass,
    RiskDistribution, RiskPrediction, RiskScore, TrainingDataset,
};
pub use registry::ModelRegistry;
pub use reporter::{MetricsReporter, ModelInfo};
pub use service::{PredictionBatch, PredictionService};
pub use trainer::ModelTrainer;
