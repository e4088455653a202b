use crate::ml::features::{FeatureVector, FEATURE_NAMES, N_FEATURES, RECENT_INCIDENT_WINDOW_DAYS};
use crate::ml::forest::ForestParams;
use crate::models::VoltageClass;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Display name reported with predictions
pub const MODEL_NAME: &str = "Random Forest Classifier - Predictive Maintenance";

/// Version of the feature set and label rule
pub const MODEL_VERSION: &str = "1.0";

/// ML model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLConfig {
    /// Minimum usable samples before training is allowed
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Fraction of samples held out for evaluation
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    /// Seed for the split and the forest
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Trailing window for recent incidents, in days
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: u32,

    /// Model artifact path (not persisted when absent)
    #[serde(default)]
    pub model_path: Option<String>,

    /// Train once at boot when no artifact exists
    #[serde(default)]
    pub train_on_startup: bool,

    /// Forest hyperparameters
    #[serde(default)]
    pub forest: ForestParams,

    /// Risk labelling thresholds
    #[serde(default)]
    pub labels: LabelRule,
}

impl Default for MLConfig {
    fn default() -> Self {
        Self {
            min_training_samples: default_min_training_samples(),
            test_fraction: default_test_fraction(),
            random_seed: default_random_seed(),
            recent_window_days: default_recent_window_days(),
            model_path: Some("./data/models/risk_model.bin".to_string()),
            train_on_startup: false,
            forest: ForestParams::default(),
            labels: LabelRule::default(),
        }
    }
}

fn default_min_training_samples() -> usize {
    10
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_random_seed() -> u64 {
    42
}

fn default_recent_window_days() -> u32 {
    RECENT_INCIDENT_WINDOW_DAYS
}

/// Ordinal risk class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskClass {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl RiskClass {
    pub const COUNT: usize = 3;

    pub fn all() -> [RiskClass; 3] {
        [RiskClass::Low, RiskClass::Medium, RiskClass::High]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RiskClass::Low),
            1 => Some(RiskClass::Medium),
            2 => Some(RiskClass::High),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RiskClass::Low => "low",
            RiskClass::Medium => "medium",
            RiskClass::High => "high",
        }
    }
}

impl From<RiskClass> for u8 {
    fn from(class: RiskClass) -> u8 {
        class as u8
    }
}

impl TryFrom<u8> for RiskClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RiskClass::from_index(value as usize)
            .ok_or_else(|| format!("risk class must be 0, 1 or 2, got {}", value))
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskClass::Low => write!(f, "Low"),
            RiskClass::Medium => write!(f, "Medium"),
            RiskClass::High => write!(f, "High"),
        }
    }
}

/// Deterministic rule deriving training labels from features
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelRule {
    /// High when recent incidents reach this count
    #[serde(default = "default_high_recent")]
    pub high_recent_incidents: u32,

    /// Medium when recent incidents reach this count
    #[serde(default = "default_medium_recent")]
    pub medium_recent_incidents: u32,

    /// Medium when the line is strictly older than this (years)
    #[serde(default = "default_medium_age")]
    pub medium_line_age_years: f64,

    /// Medium when this many towers are in poor condition
    #[serde(default = "default_medium_poor_towers")]
    pub medium_poor_towers: u32,
}

impl Default for LabelRule {
    fn default() -> Self {
        Self {
            high_recent_incidents: default_high_recent(),
            medium_recent_incidents: default_medium_recent(),
            medium_line_age_years: default_medium_age(),
            medium_poor_towers: default_medium_poor_towers(),
        }
    }
}

fn default_high_recent() -> u32 {
    10
}

fn default_medium_recent() -> u32 {
    3
}

fn default_medium_age() -> f64 {
    30.0
}

fn default_medium_poor_towers() -> u32 {
    3
}

impl LabelRule {
    pub fn label(&self, features: &FeatureVector) -> RiskClass {
        if features.recent_incidents >= self.high_recent_incidents {
            RiskClass::High
        } else if features.recent_incidents >= self.medium_recent_incidents
            || features.line_age > self.medium_line_age_years
            || features.poor_tower_count >= self.medium_poor_towers
        {
            RiskClass::Medium
        } else {
            RiskClass::Low
        }
    }
}

/// Labelled training dataset
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Risk labels
    pub labels: Vec<RiskClass>,

    /// Source line of each row
    pub line_ids: Vec<u64>,
}

impl TrainingDataset {
    /// Build a dataset from featurized lines, labelling each with `rule`
    pub fn from_samples(samples: &[(u64, FeatureVector)], rule: &LabelRule) -> Self {
        let mut features = Array2::zeros((samples.len(), N_FEATURES));
        let mut labels = Vec::with_capacity(samples.len());
        let mut line_ids = Vec::with_capacity(samples.len());

        for (i, (line_id, fv)) in samples.iter().enumerate() {
            for (j, value) in fv.to_array().iter().enumerate() {
                features[[i, j]] = *value;
            }
            labels.push(rule.label(fv));
            line_ids.push(*line_id);
        }

        Self {
            features,
            labels,
            line_ids,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Label indices for the forest
    pub fn label_indices(&self) -> Vec<usize> {
        self.labels.iter().map(|c| c.index()).collect()
    }

    /// Count of samples per class
    pub fn distribution(&self) -> RiskDistribution {
        let mut dist = RiskDistribution::default();
        for label in &self.labels {
            match label {
                RiskClass::Low => dist.low += 1,
                RiskClass::Medium => dist.medium += 1,
                RiskClass::High => dist.high += 1,
            }
        }
        dist
    }

    /// Number of test samples for `n` samples at `test_fraction`:
    /// `ceil(n × fraction)` clamped so both sides are non-empty.
    pub fn test_size(n: usize, test_fraction: f64) -> usize {
        if n < 2 {
            return 0;
        }
        // 15 × 0.2 is 3.0000000000000004 in binary floating point
        let raw = (n as f64 * test_fraction - 1e-9).ceil().max(0.0) as usize;
        raw.clamp(1, n - 1)
    }

    /// Stratified train/test split.
    ///
    /// The test set size follows [`TrainingDataset::test_size`] and is shared
    /// among classes by largest remainder of their proportional quota (ties
    /// go to the lower class). Each class is shuffled with `seed` before
    /// its quota is taken, so the same data and seed give the same split.
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> (TrainingDataset, TrainingDataset) {
        let n = self.n_samples();
        let n_test = Self::test_size(n, test_fraction);

        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); RiskClass::COUNT];
        for (i, label) in self.labels.iter().enumerate() {
            by_class[label.index()].push(i);
        }

        let quotas: Vec<f64> = by_class
            .iter()
            .map(|members| members.len() as f64 * n_test as f64 / n.max(1) as f64)
            .collect();
        let mut allocation: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
        let mut remaining = n_test.saturating_sub(allocation.iter().sum());

        let mut order: Vec<usize> = (0..RiskClass::COUNT).collect();
        order.sort_by(|&a, &b| {
            let ra = quotas[a] - quotas[a].floor();
            let rb = quotas[b] - quotas[b].floor();
            rb.total_cmp(&ra).then(a.cmp(&b))
        });
        while remaining > 0 {
            let before = remaining;
            for &class in &order {
                if remaining == 0 {
                    break;
                }
                if allocation[class] < by_class[class].len() {
                    allocation[class] += 1;
                    remaining -= 1;
                }
            }
            if remaining == before {
                break;
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train_idx = Vec::with_capacity(n - n_test);
        let mut test_idx = Vec::with_capacity(n_test);
        for (class, members) in by_class.iter_mut().enumerate() {
            members.shuffle(&mut rng);
            let take = allocation[class].min(members.len());
            test_idx.extend_from_slice(&members[..take]);
            train_idx.extend_from_slice(&members[take..]);
        }
        train_idx.sort_unstable();
        test_idx.sort_unstable();

        (self.subset(&train_idx), self.subset(&test_idx))
    }

    fn subset(&self, indices: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(ndarray::Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            line_ids: indices.iter().map(|&i| self.line_ids[i]).collect(),
        }
    }
}

/// Count of samples per risk class
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Importance of one feature in the fitted model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

/// Per-class evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Model evaluation metrics for one training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetrics {
    /// Accuracy on the test split
    pub accuracy: f64,

    /// Macro-averaged precision
    pub precision: f64,

    /// Macro-averaged recall
    pub recall: f64,

    /// Macro-averaged F1
    pub f1_score: f64,

    /// Labels over the full dataset
    pub risk_distribution: RiskDistribution,

    /// Sorted by importance, descending
    pub feature_importance: Vec<FeatureImportance>,

    pub total_samples: usize,
    pub training_samples: usize,
    pub test_samples: usize,

    /// Rows are the true class, columns the predicted class
    pub confusion_matrix: Vec<Vec<usize>>,

    /// Keyed by class name ("low", "medium", "high")
    pub per_class: BTreeMap<String, ClassMetrics>,

    /// Lines left out because features could not be derived
    pub skipped_lines: usize,

    pub trained_at: DateTime<Utc>,
}

/// Compute test-set metrics.
///
/// Precision, recall and F1 are macro-averaged over the classes that occur
/// in either the truth or the predictions. A zero denominator yields 0.
pub fn calculate_metrics(y_true: &[RiskClass], y_pred: &[RiskClass]) -> ClassificationReport {
    let n_samples = y_true.len();
    let mut confusion = vec![vec![0usize; RiskClass::COUNT]; RiskClass::COUNT];
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        confusion[t.index()][p.index()] += 1;
    }

    let correct: usize = (0..RiskClass::COUNT).map(|c| confusion[c][c]).sum();
    let accuracy = if n_samples > 0 {
        correct as f64 / n_samples as f64
    } else {
        0.0
    };

    let mut per_class = BTreeMap::new();
    let mut present = Vec::new();

    for class in RiskClass::all() {
        let c = class.index();
        let tp = confusion[c][c];
        let fp: usize = (0..RiskClass::COUNT).filter(|&t| t != c).map(|t| confusion[t][c]).sum();
        let fn_count: usize = (0..RiskClass::COUNT).filter(|&p| p != c).map(|p| confusion[c][p]).sum();
        let support = tp + fn_count;

        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };

        let recall = if support > 0 {
            tp as f64 / support as f64
        } else {
            0.0
        };

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let metrics = ClassMetrics {
            precision,
            recall,
            f1_score: f1,
            support,
        };
        if support > 0 || tp + fp > 0 {
            present.push(metrics.clone());
        }
        per_class.insert(class.name().to_string(), metrics);
    }

    let macro_avg = |f: fn(&ClassMetrics) -> f64| {
        if present.is_empty() {
            0.0
        } else {
            present.iter().map(f).sum::<f64>() / present.len() as f64
        }
    };

    ClassificationReport {
        accuracy,
        precision: macro_avg(|m| m.precision),
        recall: macro_avg(|m| m.recall),
        f1_score: macro_avg(|m| m.f1_score),
        confusion_matrix: confusion,
        per_class,
    }
}

/// Output of [`calculate_metrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub confusion_matrix: Vec<Vec<usize>>,
    pub per_class: BTreeMap<String, ClassMetrics>,
}

/// Pair importances with feature names, most important first
pub fn ranked_importance(importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
        .iter()
        .zip(importances)
        .map(|(name, importance)| FeatureImportance {
            name: name.to_string(),
            importance: *importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,

    /// Model version
    pub version: String,

    /// Training timestamp
    pub trained_at: DateTime<Utc>,

    /// Number of training samples
    pub n_training_samples: usize,

    /// Number of features
    pub n_features: usize,

    /// Hyperparameters
    pub hyperparameters: BTreeMap<String, String>,
}

impl ModelMetadata {
    pub fn new(params: &ForestParams, seed: u64, recent_window_days: u32, n_training_samples: usize) -> Self {
        let mut hyperparameters = BTreeMap::new();
        hyperparameters.insert("n_estimators".to_string(), params.n_estimators.to_string());
        hyperparameters.insert(
            "max_depth".to_string(),
            params
                .max_depth
                .map_or_else(|| "none".to_string(), |d| d.to_string()),
        );
        hyperparameters.insert(
            "min_samples_split".to_string(),
            params.min_samples_split.to_string(),
        );
        hyperparameters.insert(
            "min_samples_leaf".to_string(),
            params.min_samples_leaf.to_string(),
        );
        hyperparameters.insert(
            "max_features".to_string(),
            params.features_per_split(N_FEATURES).to_string(),
        );
        hyperparameters.insert("bootstrap".to_string(), params.bootstrap.to_string());
        hyperparameters.insert("criterion".to_string(), "gini".to_string());
        hyperparameters.insert("random_state".to_string(), seed.to_string());
        hyperparameters.insert(
            "recent_window_days".to_string(),
            recent_window_days.to_string(),
        );

        Self {
            name: MODEL_NAME.to_string(),
            version: MODEL_VERSION.to_string(),
            trained_at: Utc::now(),
            n_training_samples,
            n_features: N_FEATURES,
            hyperparameters,
        }
    }

    /// "Random Forest Classifier - Predictive Maintenance v1.0"
    pub fn description(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Output of the risk model for one feature vector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RiskScore {
    /// Arg-max class
    pub class: RiskClass,

    /// Probability of `class`
    pub probability: f64,

    /// Probabilities of Low, Medium and High
    pub probabilities: [f64; 3],
}

/// Per-line risk prediction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskPrediction {
    pub line_id: u64,
    pub line_name: String,
    pub voltage_level: VoltageClass,
    pub line_age: f64,
    pub recent_incidents: u32,
    pub predicted_risk: RiskClass,
    pub risk_probability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(recent: u32, age: f64, poor: u32) -> FeatureVector {
        FeatureVector {
            total_length_km: 100.0,
            line_age: age,
            incident_count: recent,
            recent_incidents: recent,
            tower_count: 10,
            poor_tower_count: poor,
            voltage_encoded: 1,
        }
    }

    #[test]
    fn test_label_rule_thresholds() {
        let rule = LabelRule::default();
        assert_eq!(rule.label(&fv(0, 5.0, 0)), RiskClass::Low);
        assert_eq!(rule.label(&fv(2, 5.0, 0)), RiskClass::Low);
        assert_eq!(rule.label(&fv(3, 5.0, 0)), RiskClass::Medium);
        assert_eq!(rule.label(&fv(9, 5.0, 0)), RiskClass::Medium);
        assert_eq!(rule.label(&fv(10, 5.0, 0)), RiskClass::High);
        assert_eq!(rule.label(&fv(0, 30.0, 0)), RiskClass::Low);
        assert_eq!(rule.label(&fv(0, 30.01, 0)), RiskClass::Medium);
        assert_eq!(rule.label(&fv(0, 5.0, 3)), RiskClass::Medium);
    }

    #[test]
    fn test_risk_class_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&RiskClass::High).unwrap(), "2");
        let parsed: RiskClass = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, RiskClass::Medium);
        assert!(serde_json::from_str::<RiskClass>("3").is_err());
    }

    #[test]
    fn test_test_size() {
        assert_eq!(TrainingDataset::test_size(10, 0.2), 2);
        assert_eq!(TrainingDataset::test_size(11, 0.2), 3);
        assert_eq!(TrainingDataset::test_size(15, 0.2), 3);
        assert_eq!(TrainingDataset::test_size(2, 0.2), 1);
        assert_eq!(TrainingDataset::test_size(5, 0.99), 4);
    }

    #[test]
    fn test_stratified_split_sizes_and_determinism() {
        let samples: Vec<(u64, FeatureVector)> = (0..20)
            .map(|i| {
                let recent = match i % 4 {
                    0 => 12,
                    1 => 4,
                    _ => 0,
                };
                (i as u64, fv(recent, 5.0, 0))
            })
            .collect();
        let dataset = TrainingDataset::from_samples(&samples, &LabelRule::default());
        assert_eq!(
            dataset.distribution(),
            RiskDistribution {
                low: 10,
                medium: 5,
                high: 5
            }
        );

        let (train, test) = dataset.stratified_split(0.2, 42);
        assert_eq!(train.n_samples(), 16);
        assert_eq!(test.n_samples(), 4);

        let test_dist = test.distribution();
        assert_eq!(test_dist.low, 2);
        assert_eq!(test_dist.medium + test_dist.high, 2);

        let (train2, test2) = dataset.stratified_split(0.2, 42);
        assert_eq!(train.line_ids, train2.line_ids);
        assert_eq!(test.line_ids, test2.line_ids);
    }

    #[test]
    fn test_calculate_metrics_macro_average() {
        use RiskClass::*;
        let truth = vec![Low, Low, Medium, Medium];
        let pred = vec![Low, Medium, Medium, Medium];
        let report = calculate_metrics(&truth, &pred);

        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.confusion_matrix[0], vec![1, 1, 0]);
        assert_eq!(report.confusion_matrix[1], vec![0, 2, 0]);
        // High never occurs, so only Low and Medium are averaged
        let expected_precision = (1.0 + 2.0 / 3.0) / 2.0;
        assert!((report.precision - expected_precision).abs() < 1e-12);
        assert!((report.recall - 0.75).abs() < 1e-12);
        assert_eq!(report.per_class["high"].support, 0);
    }

    #[test]
    fn test_calculate_metrics_empty() {
        let report = calculate_metrics(&[], &[]);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.f1_score, 0.0);
    }

    #[test]
    fn test_ranked_importance_sorted() {
        let ranked = ranked_importance(&[0.1, 0.05, 0.0, 0.6, 0.1, 0.1, 0.05]);
        assert_eq!(ranked.len(), N_FEATURES);
        assert_eq!(ranked[0].name, "recent_incidents");
        assert!(ranked.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_metadata_description() {
        let meta = ModelMetadata::new(&ForestParams::default(), 42, 1095, 80);
        assert_eq!(
            meta.description(),
            "Random Forest Classifier - Predictive Maintenance v1.0"
        );
        assert_eq!(meta.hyperparameters["n_estimators"], "100");
        assert_eq!(meta.hyperparameters["max_features"], "2");
    }
}
