//! Symmetric trees: each level applies one (feature, threshold) test to every
//! node, chosen to maximise the summed gain across the level.

use anyhow::Result;

use crate::booster::{
    boost, partition, BinnedMatrix, BoostSettings, Histogram, ModelFamily, Regularization, TrainingSet, TreeDraft,
    TreeEnsemble,
};
use crate::param_utils::{get_param_f64_clamped, get_param_usize_rounded_clamped, ParamSet, ParamSpec};

pub const SEARCH_SPACE: &[ParamSpec] = &[
    ParamSpec::integer("depth", 3.0, 10.0),
    ParamSpec::log("learning_rate", 0.01, 0.3),
    ParamSpec::linear("l2_leaf_reg", 1.0, 10.0),
    ParamSpec::linear("subsample", 0.6, 1.0),
];

pub fn fit(params: &ParamSet, data: &TrainingSet<'_>, n_estimators: usize, seed: u64) -> Result<TreeEnsemble> {
    let depth = get_param_usize_rounded_clamped(params, "depth", 6, 1, 12);
    let settings = BoostSettings {
        n_estimators,
        learning_rate: get_param_f64_clamped(params, "learning_rate", 0.03, 1e-4, 1.0),
        subsample: get_param_f64_clamped(params, "subsample", 1.0, 0.05, 1.0),
        seed,
    };
    let reg = Regularization {
        l1: 0.0,
        l2: get_param_f64_clamped(params, "l2_leaf_reg", 3.0, 0.0, 1e6),
        min_child_samples: 0,
        min_child_weight: 0.0,
    };

    boost(ModelFamily::CatBoost, data, settings, |bins, rows, grads| {
        grow_tree(bins, rows, grads, &reg, depth)
    })
}

#[derive(Debug, Clone, Copy)]
struct LevelSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

fn grow_tree(bins: &BinnedMatrix, rows: &[usize], grads: &[f64], reg: &Regularization, depth: usize) -> TreeDraft {
    let total: f64 = rows.iter().map(|row| grads[*row]).sum();
    let mut draft = TreeDraft::new(reg.leaf_weight(total, rows.len() as f64));
    let mut level = vec![(0usize, rows.to_vec())];

    for _ in 0..depth {
        let Some(split) = best_level_split(bins, &level, grads, reg) else {
            break;
        };
        let mut next = Vec::with_capacity(level.len() * 2);
        for (node, node_rows) in level {
            let (left_rows, right_rows) = partition(bins, &node_rows, split.feature, split.bin);
            let (left, right) = draft.split(
                node,
                split.feature,
                bins.threshold(split.feature, split.bin),
                node_weight(&left_rows, grads, reg),
                node_weight(&right_rows, grads, reg),
            );
            next.push((left, left_rows));
            next.push((right, right_rows));
        }
        level = next;
    }
    draft
}

fn node_weight(rows: &[usize], grads: &[f64], reg: &Regularization) -> f64 {
    let sum: f64 = rows.iter().map(|row| grads[*row]).sum();
    reg.leaf_weight(sum, rows.len() as f64)
}

fn best_level_split(
    bins: &BinnedMatrix,
    level: &[(usize, Vec<usize>)],
    grads: &[f64],
    reg: &Regularization,
) -> Option<LevelSplit> {
    let n_features = bins.n_features();
    let mut gains: Vec<Vec<f64>> = (0..n_features)
        .map(|feature| vec![0.0; bins.bin_count(feature).saturating_sub(1)])
        .collect();

    for (_, rows) in level {
        if rows.is_empty() {
            continue;
        }
        let histogram = Histogram::build(bins, rows, grads);
        let total_grad: f64 = rows.iter().map(|row| grads[*row]).sum();
        let total_count = rows.len() as f64;
        let parent = reg.score(total_grad, total_count);
        for (feature, feature_gains) in gains.iter_mut().enumerate() {
            let mut left_grad = 0.0;
            let mut left_count = 0.0;
            for (bin, gain) in feature_gains.iter_mut().enumerate() {
                left_grad += histogram.grads[feature][bin];
                left_count += histogram.counts[feature][bin];
                *gain += reg.score(left_grad, left_count)
                    + reg.score(total_grad - left_grad, total_count - left_count)
                    - parent;
            }
        }
    }

    let mut best: Option<LevelSplit> = None;
    for (feature, feature_gains) in gains.iter().enumerate() {
        for (bin, gain) in feature_gains.iter().enumerate() {
            if *gain > 1e-12 && best.map_or(true, |current| *gain > current.gain) {
                best = Some(LevelSplit {
                    feature,
                    bin,
                    gain: *gain,
                });
            }
        }
    }
    best
}
