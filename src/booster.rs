use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::param_utils::{ParamSet, ParamSpec};

#[path = "boosters/depthwise.rs"]
pub mod depthwise;

#[path = "boosters/oblivious.rs"]
pub mod oblivious;

#[path = "boosters/leafwise.rs"]
pub mod leafwise;

/// Upper bound on histogram bins per feature.
pub const MAX_BINS: usize = 64;
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// The three candidate residual-model families.
///
/// Variant order is the champion tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Level-wise trees with L1/L2-regularised leaf weights.
    XGBoost,
    /// Symmetric (oblivious) trees: one split per level shared by every node.
    CatBoost,
    /// Best-first trees bounded by leaf count.
    LightGBM,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [ModelFamily::XGBoost, ModelFamily::CatBoost, ModelFamily::LightGBM];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::XGBoost => "xgboost",
            Self::CatBoost => "catboost",
            Self::LightGBM => "lightgbm",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::XGBoost => "XGBoost",
            Self::CatBoost => "CatBoost",
            Self::LightGBM => "LightGBM",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "xgboost" | "xgb" => Ok(Self::XGBoost),
            "catboost" | "cat" => Ok(Self::CatBoost),
            "lightgbm" | "lgbm" => Ok(Self::LightGBM),
            other => Err(anyhow!("unknown model family '{}'", other)),
        }
    }

    pub fn search_space(self) -> &'static [ParamSpec] {
        match self {
            Self::XGBoost => depthwise::SEARCH_SPACE,
            Self::CatBoost => oblivious::SEARCH_SPACE,
            Self::LightGBM => leafwise::SEARCH_SPACE,
        }
    }

    /// Fits `n_estimators` trees of this family on residual targets.
    pub fn fit(
        self,
        params: &ParamSet,
        data: &TrainingSet<'_>,
        n_estimators: usize,
        seed: u64,
    ) -> Result<TreeEnsemble> {
        match self {
            Self::XGBoost => depthwise::fit(params, data, n_estimators, seed),
            Self::CatBoost => oblivious::fit(params, data, n_estimators, seed),
            Self::LightGBM => leafwise::fit(params, data, n_estimators, seed),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-feature quantile bins of a training matrix, stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedMatrix {
    n_rows: usize,
    columns: Vec<Vec<u16>>,
    cuts: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub fn from_rows(rows: &[Vec<f64>], max_bins: usize) -> Result<Self> {
        let n_features = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != n_features) {
            return Err(anyhow!("feature rows have inconsistent lengths"));
        }
        if rows.iter().flatten().any(|value| !value.is_finite()) {
            return Err(anyhow!("feature matrix contains non-finite values"));
        }
        let max_bins = max_bins.clamp(2, u16::MAX as usize);

        let mut columns = Vec::with_capacity(n_features);
        let mut cuts = Vec::with_capacity(n_features);
        for feature in 0..n_features {
            let mut unique: Vec<f64> = rows.iter().map(|row| row[feature]).collect();
            unique.sort_by(f64::total_cmp);
            unique.dedup();
            let feature_cuts = bin_cuts(&unique, max_bins);
            let column = rows
                .iter()
                .map(|row| feature_cuts.partition_point(|cut| *cut < row[feature]) as u16)
                .collect();
            columns.push(column);
            cuts.push(feature_cuts);
        }

        Ok(Self {
            n_rows: rows.len(),
            columns,
            cuts,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    fn bin(&self, feature: usize, row: usize) -> usize {
        self.columns[feature][row] as usize
    }

    fn bin_count(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.cuts[feature][bin]
    }
}

fn bin_cuts(unique: &[f64], max_bins: usize) -> Vec<f64> {
    if unique.len() < 2 {
        return Vec::new();
    }
    if unique.len() <= max_bins {
        return unique.windows(2).map(|pair| (pair[0] + pair[1]) / 2.0).collect();
    }
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|q| {
            let index = (q * unique.len() / max_bins).clamp(1, unique.len() - 1);
            (unique[index - 1] + unique[index]) / 2.0
        })
        .collect();
    cuts.dedup();
    cuts
}

/// Borrowed view of a residual training set.
pub struct TrainingSet<'a> {
    pub features: &'a [Vec<f64>],
    pub targets: &'a [f64],
    pub bins: &'a BinnedMatrix,
}

impl<'a> TrainingSet<'a> {
    pub fn new(features: &'a [Vec<f64>], targets: &'a [f64], bins: &'a BinnedMatrix) -> Result<Self> {
        if features.is_empty() {
            return Err(anyhow!("cannot fit a tree model on zero rows"));
        }
        if features.len() != targets.len() || bins.n_rows() != features.len() {
            return Err(anyhow!(
                "training set mismatch: {} feature rows, {} targets, {} binned rows",
                features.len(),
                targets.len(),
                bins.n_rows()
            ));
        }
        if targets.iter().any(|value| !value.is_finite()) {
            return Err(anyhow!("training targets must be finite"));
        }
        Ok(Self {
            features,
            targets,
            bins,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.bins.n_features()
    }
}

/// Regularisation shared by the split search and leaf weights.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Regularization {
    pub l1: f64,
    pub l2: f64,
    pub min_child_samples: usize,
    pub min_child_weight: f64,
}

impl Regularization {
    fn thresholded(&self, grad: f64) -> f64 {
        if grad > self.l1 {
            grad - self.l1
        } else if grad < -self.l1 {
            grad + self.l1
        } else {
            0.0
        }
    }

    /// Optimal leaf value for squared error: residual sum over count.
    pub fn leaf_weight(&self, grad: f64, count: f64) -> f64 {
        let denominator = count + self.l2;
        if denominator <= 0.0 {
            return 0.0;
        }
        self.thresholded(grad) / denominator
    }

    pub fn score(&self, grad: f64, count: f64) -> f64 {
        let denominator = count + self.l2;
        if denominator <= 0.0 {
            return 0.0;
        }
        let g = self.thresholded(grad);
        g * g / denominator
    }

    fn child_allowed(&self, count: f64) -> bool {
        count >= self.min_child_samples as f64 && count >= self.min_child_weight
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitCandidate {
    pub feature: usize,
    pub bin: usize,
    pub threshold: f64,
    pub gain: f64,
    pub left_grad: f64,
    pub left_count: f64,
    pub right_grad: f64,
    pub right_count: f64,
}

/// Gradient sum and row count per bin, one vector per feature.
pub(crate) struct Histogram {
    pub grads: Vec<Vec<f64>>,
    pub counts: Vec<Vec<f64>>,
}

impl Histogram {
    pub fn build(bins: &BinnedMatrix, rows: &[usize], grads: &[f64]) -> Self {
        let n_features = bins.n_features();
        let mut hist_grads = Vec::with_capacity(n_features);
        let mut hist_counts = Vec::with_capacity(n_features);
        for feature in 0..n_features {
            let mut feature_grads = vec![0.0; bins.bin_count(feature)];
            let mut feature_counts = vec![0.0; bins.bin_count(feature)];
            for &row in rows {
                let bin = bins.bin(feature, row);
                feature_grads[bin] += grads[row];
                feature_counts[bin] += 1.0;
            }
            hist_grads.push(feature_grads);
            hist_counts.push(feature_counts);
        }
        Self {
            grads: hist_grads,
            counts: hist_counts,
        }
    }
}

/// Best single split of one node, scanning features and bins in order so ties
/// resolve to the lowest feature index and bin.
pub(crate) fn best_split(
    bins: &BinnedMatrix,
    rows: &[usize],
    grads: &[f64],
    reg: &Regularization,
) -> Option<SplitCandidate> {
    if rows.len() < 2 {
        return None;
    }
    let histogram = Histogram::build(bins, rows, grads);
    let total_grad: f64 = rows.iter().map(|row| grads[*row]).sum();
    let total_count = rows.len() as f64;
    let parent_score = reg.score(total_grad, total_count);

    let mut best: Option<SplitCandidate> = None;
    for feature in 0..bins.n_features() {
        let mut left_grad = 0.0;
        let mut left_count = 0.0;
        for bin in 0..bins.bin_count(feature).saturating_sub(1) {
            left_grad += histogram.grads[feature][bin];
            left_count += histogram.counts[feature][bin];
            let right_grad = total_grad - left_grad;
            let right_count = total_count - left_count;
            if !reg.child_allowed(left_count) || !reg.child_allowed(right_count) {
                continue;
            }
            let gain = reg.score(left_grad, left_count) + reg.score(right_grad, right_count) - parent_score;
            if gain > MIN_SPLIT_GAIN && best.map_or(true, |current| gain > current.gain) {
                best = Some(SplitCandidate {
                    feature,
                    bin,
                    threshold: bins.threshold(feature, bin),
                    gain,
                    left_grad,
                    left_count,
                    right_grad,
                    right_count,
                });
            }
        }
    }
    best
}

pub(crate) fn partition(bins: &BinnedMatrix, rows: &[usize], feature: usize, bin: usize) -> (Vec<usize>, Vec<usize>) {
    rows.iter().partition(|row| bins.bin(feature, **row) <= bin)
}

/// A tree under construction. Leaves are split in place.
pub(crate) struct TreeDraft {
    nodes: Vec<DraftNode>,
}

#[derive(Debug, Clone, Copy)]
enum DraftNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        value: f64,
        left: usize,
        right: usize,
    },
}

impl TreeDraft {
    pub fn new(root_value: f64) -> Self {
        Self {
            nodes: vec![DraftNode::Leaf { value: root_value }],
        }
    }

    /// Turns leaf `node` into a split and returns the new (left, right) leaves.
    pub fn split(
        &mut self,
        node: usize,
        feature: usize,
        threshold: f64,
        left_value: f64,
        right_value: f64,
    ) -> (usize, usize) {
        let value = match self.nodes[node] {
            DraftNode::Leaf { value } => value,
            DraftNode::Split { value, .. } => value,
        };
        let left = self.nodes.len();
        self.nodes.push(DraftNode::Leaf { value: left_value });
        let right = self.nodes.len();
        self.nodes.push(DraftNode::Leaf { value: right_value });
        self.nodes[node] = DraftNode::Split {
            feature,
            threshold,
            value,
            left,
            right,
        };
        (left, right)
    }

    /// Flattens the draft into the array layout: internal nodes numbered in
    /// pre-order from the root, leaves referenced as `-(leaf + 1)`.
    pub fn finish(self, shrinkage: f64) -> RegressionTree {
        let mut internal_ids = vec![usize::MAX; self.nodes.len()];
        let mut leaf_ids = vec![usize::MAX; self.nodes.len()];
        let mut internal_count = 0;
        let mut leaf_count = 0;
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            match self.nodes[node] {
                DraftNode::Leaf { .. } => {
                    leaf_ids[node] = leaf_count;
                    leaf_count += 1;
                }
                DraftNode::Split { left, right, .. } => {
                    internal_ids[node] = internal_count;
                    internal_count += 1;
                    stack.push(right);
                    stack.push(left);
                }
            }
        }

        let child_ref = |node: usize| -> i32 {
            if internal_ids[node] != usize::MAX {
                internal_ids[node] as i32
            } else {
                -(leaf_ids[node] as i32) - 1
            }
        };

        let mut tree = RegressionTree {
            split_features: vec![0; internal_count],
            thresholds: vec![0.0; internal_count],
            left_child: vec![0; internal_count],
            right_child: vec![0; internal_count],
            internal_values: vec![0.0; internal_count],
            leaf_values: vec![0.0; leaf_count],
            shrinkage,
        };
        for (node, draft) in self.nodes.iter().enumerate() {
            match *draft {
                DraftNode::Leaf { value } => {
                    if leaf_ids[node] != usize::MAX {
                        tree.leaf_values[leaf_ids[node]] = value;
                    }
                }
                DraftNode::Split {
                    feature,
                    threshold,
                    value,
                    left,
                    right,
                } => {
                    let id = internal_ids[node];
                    if id == usize::MAX {
                        continue;
                    }
                    tree.split_features[id] = feature;
                    tree.thresholds[id] = threshold;
                    tree.internal_values[id] = value;
                    tree.left_child[id] = child_ref(left);
                    tree.right_child[id] = child_ref(right);
                }
            }
        }
        tree
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    internal_values: Vec<f64>,
    leaf_values: Vec<f64>,
    shrinkage: f64,
}

impl RegressionTree {
    pub fn constant(value: f64) -> Self {
        Self {
            split_features: Vec::new(),
            thresholds: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            internal_values: Vec::new(),
            leaf_values: vec![value],
            shrinkage: 1.0,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_values.len()
    }

    fn child(&self, node: usize, features: &[f64]) -> i32 {
        let feature_value = features
            .get(self.split_features[node])
            .copied()
            .unwrap_or(0.0);
        if feature_value <= self.thresholds[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or(0.0) * self.shrinkage;
        }
        let mut node = 0usize;
        loop {
            let child = self.child(node, features);
            if child < 0 {
                let leaf = (-child - 1) as usize;
                return self.leaf_values.get(leaf).copied().unwrap_or(0.0) * self.shrinkage;
            }
            node = child as usize;
        }
    }

    /// Decision-path attribution: adds each split's value change to the
    /// feature it tested and returns the root value. Root value plus the
    /// added contributions equals `predict(features)`.
    fn contributions(&self, features: &[f64], out: &mut [f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or(0.0) * self.shrinkage;
        }
        let mut node = 0usize;
        loop {
            let child = self.child(node, features);
            let node_value = self.internal_values[node];
            let child_value = if child < 0 {
                self.leaf_values.get((-child - 1) as usize).copied().unwrap_or(0.0)
            } else {
                self.internal_values[child as usize]
            };
            if let Some(slot) = out.get_mut(self.split_features[node]) {
                *slot += (child_value - node_value) * self.shrinkage;
            }
            if child < 0 {
                break;
            }
            node = child as usize;
        }
        self.internal_values[0] * self.shrinkage
    }
}

/// A fitted residual model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    family: ModelFamily,
    base_score: f64,
    feature_count: usize,
    trees: Vec<RegressionTree>,
}

impl TreeEnsemble {
    /// An ensemble that predicts `value` for every input.
    pub fn constant(family: ModelFamily, value: f64, feature_count: usize) -> Self {
        Self {
            family,
            base_score: value,
            feature_count,
            trees: Vec::new(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|tree| tree.predict(features)).sum::<f64>()
    }

    pub fn predict_many(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict(row)).collect()
    }

    /// Per-feature contributions and the base value (bias). Bias plus the sum
    /// of contributions reproduces `predict`.
    pub fn contributions(&self, features: &[f64]) -> Result<(f64, Vec<f64>)> {
        if features.len() != self.feature_count {
            return Err(anyhow!(
                "expected {} features for attribution, got {}",
                self.feature_count,
                features.len()
            ));
        }
        let mut contributions = vec![0.0; self.feature_count];
        let mut bias = self.base_score;
        for tree in &self.trees {
            bias += tree.contributions(features, &mut contributions);
        }
        Ok((bias, contributions))
    }
}

/// Shared settings of the gradient boosting loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoostSettings {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub seed: u64,
}

/// Squared-error gradient boosting. `grow` builds one tree from the sampled
/// rows and the current residuals.
pub(crate) fn boost<F>(
    family: ModelFamily,
    data: &TrainingSet<'_>,
    settings: BoostSettings,
    mut grow: F,
) -> Result<TreeEnsemble>
where
    F: FnMut(&BinnedMatrix, &[usize], &[f64]) -> TreeDraft,
{
    let n = data.targets.len();
    let base_score = data.targets.iter().sum::<f64>() / n as f64;
    let mut predictions = vec![base_score; n];
    let mut residuals = vec![0.0; n];
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut trees = Vec::with_capacity(settings.n_estimators);

    for _ in 0..settings.n_estimators {
        for ((residual, target), prediction) in residuals.iter_mut().zip(data.targets).zip(&predictions) {
            *residual = target - prediction;
        }
        let rows = sample_rows(n, settings.subsample, &mut rng);
        let tree = grow(data.bins, &rows, &residuals).finish(settings.learning_rate);
        for (prediction, row) in predictions.iter_mut().zip(data.features) {
            *prediction += tree.predict(row);
        }
        trees.push(tree);
    }

    Ok(TreeEnsemble {
        family,
        base_score,
        feature_count: data.feature_count(),
        trees,
    })
}

/// Bernoulli row sampling; keeps at least one row.
fn sample_rows(n: usize, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let mut rows: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < fraction).collect();
    if rows.is_empty() && n > 0 {
        rows.push(rng.gen_range(0..n));
    }
    rows
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn bins_respect_threshold_semantics() {
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64 * 0.5]).collect();
        let bins = BinnedMatrix::from_rows(&rows, 16).unwrap();
        assert!(bins.bin_count(0) <= 16);
        for (row_index, row) in rows.iter().enumerate() {
            let bin = bins.bin(0, row_index);
            for cut_bin in 0..bins.bin_count(0) - 1 {
                let threshold = bins.threshold(0, cut_bin);
                assert_eq!(row[0] <= threshold, bin <= cut_bin);
            }
        }
    }

    #[test]
    fn binning_rejects_non_finite() {
        assert!(BinnedMatrix::from_rows(&[vec![1.0], vec![f64::NAN]], 8).is_err());
    }

    #[test]
    fn draft_flattens_in_preorder() {
        let mut draft = TreeDraft::new(0.0);
        let (left, _right) = draft.split(0, 0, 5.0, -1.0, 1.0);
        draft.split(left, 1, 2.0, -2.0, -0.5);
        let tree = draft.finish(1.0);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.predict(&[1.0, 1.0]), -2.0);
        assert_eq!(tree.predict(&[1.0, 3.0]), -0.5);
        assert_eq!(tree.predict(&[6.0, 0.0]), 1.0);
    }

    #[test]
    fn contributions_sum_to_prediction() {
        let (features, targets) = step_data(120);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let data = TrainingSet::new(&features, &targets, &bins).unwrap();
        for family in ModelFamily::ALL {
            let model = family.fit(&ParamSet::new(), &data, 20, 7).unwrap();
            for row in features.iter().take(15) {
                let (bias, contributions) = model.contributions(row).unwrap();
                let total = bias + contributions.iter().sum::<f64>();
                assert!((total - model.predict(row)).abs() < 1e-9, "{}", family);
            }
            assert!(model.contributions(&[1.0]).is_err());
        }
    }

    #[test]
    fn every_family_learns_a_step() {
        let (features, targets) = step_data(220);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let data = TrainingSet::new(&features, &targets, &bins).unwrap();
        for family in ModelFamily::ALL {
            let model = family.fit(&ParamSet::new(), &data, 100, 42).unwrap();
            let error = mae(&model.predict_many(&features), &targets);
            assert!(error < 1.0, "{} mae {}", family, error);
            assert_eq!(model.family(), family);
            assert_eq!(model.tree_count(), 100);
        }
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (features, targets) = step_data(150);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let data = TrainingSet::new(&features, &targets, &bins).unwrap();
        let mut params = ParamSet::new();
        params.insert("subsample".to_string(), 0.7);
        for family in ModelFamily::ALL {
            let first = family.fit(&params, &data, 30, 3).unwrap();
            let second = family.fit(&params, &data, 30, 3).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn constant_ensemble_predicts_its_value() {
        let model = TreeEnsemble::constant(ModelFamily::LightGBM, 0.0, 4);
        assert_eq!(model.predict(&[1.0, 2.0, 3.0, 4.0]), 0.0);
        let (bias, contributions) = model.contributions(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(bias, 0.0);
        assert_eq!(contributions, vec![0.0; 4]);
    }

    #[test]
    fn family_tags_parse_and_serialize() {
        assert_eq!(ModelFamily::parse("LGBM").unwrap(), ModelFamily::LightGBM);
        assert!(ModelFamily::parse("randomforest").is_err());
        assert_eq!(serde_json::to_string(&ModelFamily::CatBoost).unwrap(), "\"catboost\"");
    }

    #[test]
    fn training_set_validates_shapes() {
        let features = vec![vec![1.0], vec![2.0]];
        let bins = BinnedMatrix::from_rows(&features, 8).unwrap();
        assert!(TrainingSet::new(&features, &[1.0], &bins).is_err());
        assert!(TrainingSet::new(&[], &[], &bins).is_err());
    }
}
