//! CART decision trees and bagged random forests.
//!
//! Trees split on Gini impurity, consider a random subset of features per
//! node and store class distributions in their leaves. A forest averages
//! those distributions. Everything here is plain data so a fitted forest
//! serializes with serde.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while fitting or querying a forest
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForestError {
    #[error("cannot fit a forest on an empty dataset")]
    EmptyDataset,

    #[error("expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("feature {index} has invalid value {value}")]
    InvalidFeature { index: usize, value: f64 },

    #[error("label {label} is outside 0..{n_classes}")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error("invalid forest parameters: {0}")]
    InvalidParams(String),
}

/// Forest hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestParams {
    /// Number of trees
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Maximum tree depth (unlimited when absent)
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Minimum samples required to split a node
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,

    /// Minimum samples in each child of a split
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,

    /// Features considered per split (floor(sqrt(n_features)) when absent)
    #[serde(default)]
    pub max_features: Option<usize>,

    /// Draw a bootstrap sample for every tree
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: None,
            bootstrap: default_bootstrap(),
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<(), ForestError> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidParams(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        if self.max_features == Some(0) {
            return Err(ForestError::InvalidParams(
                "max_features must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of candidate features drawn at each node
    pub fn features_per_split(&self, n_features: usize) -> usize {
        match self.max_features {
            Some(k) => k.clamp(1, n_features.max(1)),
            None => ((n_features as f64).sqrt().floor() as usize).max(1),
        }
    }
}

fn default_n_estimators() -> usize {
    100
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_bootstrap() -> bool {
    true
}

/// Tree node stored in a flat arena
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single fitted classification tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_classes: usize,
}

struct BuildContext<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    features_per_split: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn class_counts(samples: &[usize], y: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &i in samples {
        counts[y[i]] += 1;
    }
    counts
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

impl DecisionTree {
    /// Grow a tree on the given sample indices (duplicates allowed).
    ///
    /// Returns the tree and its unnormalized impurity-decrease importances.
    fn grow(ctx: &BuildContext<'_>, samples: Vec<usize>, rng: &mut StdRng) -> (Self, Vec<f64>) {
        let n_features = ctx.x.ncols();
        let n_root = samples.len() as f64;
        let mut importance = vec![0.0; n_features];
        let mut nodes = vec![Node::Leaf {
            distribution: Vec::new(),
        }];
        let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(0, samples, 0)];

        while let Some((slot, samples, depth)) = stack.pop() {
            let counts = class_counts(&samples, ctx.y, ctx.n_classes);
            let n = samples.len();
            let impurity = gini(&counts, n);

            let can_split = n >= ctx.params.min_samples_split
                && n >= 2 * ctx.params.min_samples_leaf
                && impurity > 0.0
                && ctx.params.max_depth.map_or(true, |max| depth < max);

            let split = if can_split {
                Self::find_split(ctx, &samples, rng)
            } else {
                None
            };

            match split {
                Some(best) => {
                    importance[best.feature] += (n as f64 / n_root) * (impurity - best.impurity);

                    let (left, right): (Vec<usize>, Vec<usize>) = samples
                        .into_iter()
                        .partition(|&i| ctx.x[[i, best.feature]] <= best.threshold);

                    let left_slot = nodes.len();
                    let right_slot = left_slot + 1;
                    nodes.push(Node::Leaf {
                        distribution: Vec::new(),
                    });
                    nodes.push(Node::Leaf {
                        distribution: Vec::new(),
                    });
                    nodes[slot] = Node::Split {
                        feature: best.feature,
                        threshold: best.threshold,
                        left: left_slot,
                        right: right_slot,
                    };

                    stack.push((right_slot, right, depth + 1));
                    stack.push((left_slot, left, depth + 1));
                }
                None => {
                    let total = n.max(1) as f64;
                    nodes[slot] = Node::Leaf {
                        distribution: counts.iter().map(|&c| c as f64 / total).collect(),
                    };
                }
            }
        }

        (
            Self {
                nodes,
                n_classes: ctx.n_classes,
            },
            importance,
        )
    }

    /// Best Gini split over a random feature subset. If none of the drawn
    /// features admits a valid split, the remaining features are tried too.
    fn find_split(ctx: &BuildContext<'_>, samples: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
        let n_features = ctx.x.ncols();
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(rng);

        let mut best: Option<BestSplit> = None;
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= ctx.features_per_split && best.is_some() {
                break;
            }
            if let Some(candidate) = Self::best_threshold(ctx, samples, feature) {
                let better = best
                    .as_ref()
                    .map_or(true, |current| candidate.impurity < current.impurity);
                if better {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn best_threshold(ctx: &BuildContext<'_>, samples: &[usize], feature: usize) -> Option<BestSplit> {
        let n = samples.len();
        let min_leaf = ctx.params.min_samples_leaf;

        let mut sorted: Vec<(f64, usize)> = samples
            .iter()
            .map(|&i| (ctx.x[[i, feature]], ctx.y[i]))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut right = vec![0usize; ctx.n_classes];
        for &(_, label) in &sorted {
            right[label] += 1;
        }
        let mut left = vec![0usize; ctx.n_classes];

        let mut best: Option<BestSplit> = None;
        for k in 1..n {
            let (value, label) = sorted[k - 1];
            left[label] += 1;
            right[label] -= 1;

            let next = sorted[k].0;
            if value >= next || k < min_leaf || n - k < min_leaf {
                continue;
            }

            let weighted =
                (k as f64 * gini(&left, k) + (n - k) as f64 * gini(&right, n - k)) / n as f64;
            if best.as_ref().map_or(true, |b| weighted < b.impurity) {
                let mut threshold = value + (next - value) / 2.0;
                if threshold >= next || !threshold.is_finite() {
                    threshold = value;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    impurity: weighted,
                });
            }
        }
        best
    }

    /// Class distribution of the leaf reached by `row`
    pub fn leaf_distribution(&self, row: &[f64]) -> &[f64] {
        let mut slot = 0;
        loop {
            match &self.nodes[slot] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    slot = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Number of nodes (splits and leaves)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Length of the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((slot, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = &self.nodes[slot] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fit a forest on `x` (samples × features) with labels in `0..n_classes`.
    ///
    /// Per-tree seeds are drawn from `seed` before the trees are grown in
    /// parallel, so the result does not depend on thread scheduling.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, ForestError> {
        params.validate()?;

        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(ForestError::EmptyDataset);
        }
        if y.len() != n_samples {
            return Err(ForestError::DimensionMismatch {
                expected: n_samples,
                actual: y.len(),
            });
        }
        if n_classes == 0 {
            return Err(ForestError::InvalidParams(
                "n_classes must be at least 1".to_string(),
            ));
        }
        if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
            return Err(ForestError::InvalidLabel { label, n_classes });
        }
        for row in x.rows() {
            check_row(row)?;
        }

        let ctx = BuildContext {
            x: x.view(),
            y,
            n_classes,
            params,
            features_per_split: params.features_per_split(n_features),
        };

        let mut master = StdRng::seed_from_u64(seed);
        let tree_seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let grown: Vec<(DecisionTree, Vec<f64>)> = tree_seeds
            .into_par_iter()
            .map(|tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let samples: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                DecisionTree::grow(&ctx, samples, &mut rng)
            })
            .collect();

        let mut feature_importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, importance) in grown {
            let total: f64 = importance.iter().sum();
            if total > 0.0 {
                for (acc, value) in feature_importances.iter_mut().zip(&importance) {
                    *acc += value / total;
                }
            }
            trees.push(tree);
        }
        normalize(&mut feature_importances);

        Ok(Self {
            trees,
            n_features,
            n_classes,
            feature_importances,
        })
    }

    /// Averaged class probabilities for one sample
    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        check_row(ArrayView1::from(row))?;

        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *acc += p;
            }
        }
        let n_trees = self.trees.len() as f64;
        for p in proba.iter_mut() {
            *p /= n_trees;
        }
        Ok(proba)
    }

    /// Most probable class; ties go to the lowest class index
    pub fn predict(&self, row: &[f64]) -> Result<usize, ForestError> {
        let proba = self.predict_proba(row)?;
        Ok(argmax(&proba))
    }

    /// Impurity-based importances, one per feature, summing to 1
    /// (all zeros when no tree ever split)
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

/// Index of the largest value, first one on ties
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn normalize(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        for v in values.iter_mut() {
            *v /= total;
        }
    }
}

fn check_row(row: ArrayView1<'_, f64>) -> Result<(), ForestError> {
    match row.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ForestError::InvalidFeature {
            index,
            value: row[index],
        }),
        None => Ok(()),
    }
}
