//! Level-wise trees: every node is split until `max_depth` or until no split
//! gains, with L1 (`reg_alpha`) and L2 (`reg_lambda`) regularised weights.

use anyhow::Result;

use crate::booster::{
    best_split, boost, partition, BinnedMatrix, BoostSettings, ModelFamily, Regularization, TrainingSet,
    TreeDraft, TreeEnsemble,
};
use crate::param_utils::{get_param_f64_clamped, get_param_usize_rounded_clamped, ParamSet, ParamSpec};

pub const SEARCH_SPACE: &[ParamSpec] = &[
    ParamSpec::integer("max_depth", 3.0, 10.0),
    ParamSpec::log("learning_rate", 0.01, 0.3),
    ParamSpec::linear("subsample", 0.6, 1.0),
    ParamSpec::linear("reg_alpha", 0.0, 10.0),
    ParamSpec::linear("reg_lambda", 0.0, 10.0),
];

pub fn fit(params: &ParamSet, data: &TrainingSet<'_>, n_estimators: usize, seed: u64) -> Result<TreeEnsemble> {
    let max_depth = get_param_usize_rounded_clamped(params, "max_depth", 6, 1, 16);
    let settings = BoostSettings {
        n_estimators,
        learning_rate: get_param_f64_clamped(params, "learning_rate", 0.3, 1e-4, 1.0),
        subsample: get_param_f64_clamped(params, "subsample", 1.0, 0.05, 1.0),
        seed,
    };
    let reg = Regularization {
        l1: get_param_f64_clamped(params, "reg_alpha", 0.0, 0.0, 1e6),
        l2: get_param_f64_clamped(params, "reg_lambda", 1.0, 0.0, 1e6),
        min_child_samples: 1,
        min_child_weight: 1.0,
    };

    boost(ModelFamily::XGBoost, data, settings, |bins, rows, grads| {
        grow_tree(bins, rows, grads, &reg, max_depth)
    })
}

fn grow_tree(bins: &BinnedMatrix, rows: &[usize], grads: &[f64], reg: &Regularization, max_depth: usize) -> TreeDraft {
    let total: f64 = rows.iter().map(|row| grads[*row]).sum();
    let mut draft = TreeDraft::new(reg.leaf_weight(total, rows.len() as f64));
    let mut frontier = vec![(0usize, rows.to_vec())];

    for _ in 0..max_depth {
        let mut next = Vec::new();
        for (node, node_rows) in frontier {
            let Some(split) = best_split(bins, &node_rows, grads, reg) else {
                continue;
            };
            let (left, right) = draft.split(
                node,
                split.feature,
                split.threshold,
                reg.leaf_weight(split.left_grad, split.left_count),
                reg.leaf_weight(split.right_grad, split.right_count),
            );
            let (left_rows, right_rows) = partition(bins, &node_rows, split.feature, split.bin);
            next.push((left, left_rows));
            next.push((right, right_rows));
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::test_support::{mae, step_data};
    use crate::booster::MAX_BINS;

    #[test]
    fn depth_limits_leaf_count() {
        let (features, targets) = step_data(200);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let reg = Regularization {
            l1: 0.0,
            l2: 1.0,
            min_child_samples: 1,
            min_child_weight: 1.0,
        };
        let rows: Vec<usize> = (0..features.len()).collect();
        let tree = grow_tree(&bins, &rows, &targets, &reg, 2).finish(1.0);
        assert!(tree.leaf_count() <= 4);
    }

    #[test]
    fn strong_l1_shrinks_predictions() {
        let (features, targets) = step_data(200);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let data = TrainingSet::new(&features, &targets, &bins).unwrap();
        let mut light = ParamSet::new();
        light.insert("reg_alpha".to_string(), 0.0);
        let mut heavy = ParamSet::new();
        heavy.insert("reg_alpha".to_string(), 10_000.0);
        let light_error = mae(&fit(&light, &data, 20, 1).unwrap().predict_many(&features), &targets);
        let heavy_error = mae(&fit(&heavy, &data, 20, 1).unwrap().predict_many(&features), &targets);
        assert!(light_error < heavy_error);
    }
}
