//! Best-first trees: the leaf with the largest gain is split next until
//! `num_leaves` is reached. Leaves keep at least `MIN_DATA_IN_LEAF` rows.

use anyhow::Result;

use crate::booster::{
    best_split, boost, partition, BinnedMatrix, BoostSettings, ModelFamily, Regularization, SplitCandidate,
    TrainingSet, TreeDraft, TreeEnsemble,
};
use crate::param_utils::{get_param_f64_clamped, get_param_usize_rounded_clamped, ParamSet, ParamSpec};

const MIN_DATA_IN_LEAF: usize = 20;
const MIN_SUM_HESSIAN_IN_LEAF: f64 = 1e-3;

pub const SEARCH_SPACE: &[ParamSpec] = &[
    ParamSpec::integer("num_leaves", 20.0, 150.0),
    ParamSpec::log("learning_rate", 0.01, 0.3),
    ParamSpec::linear("reg_alpha", 0.0, 10.0),
    ParamSpec::linear("reg_lambda", 0.0, 10.0),
];

pub fn fit(params: &ParamSet, data: &TrainingSet<'_>, n_estimators: usize, seed: u64) -> Result<TreeEnsemble> {
    let num_leaves = get_param_usize_rounded_clamped(params, "num_leaves", 31, 2, 4096);
    let settings = BoostSettings {
        n_estimators,
        learning_rate: get_param_f64_clamped(params, "learning_rate", 0.1, 1e-4, 1.0),
        subsample: 1.0,
        seed,
    };
    let reg = Regularization {
        l1: get_param_f64_clamped(params, "reg_alpha", 0.0, 0.0, 1e6),
        l2: get_param_f64_clamped(params, "reg_lambda", 0.0, 0.0, 1e6),
        min_child_samples: MIN_DATA_IN_LEAF,
        min_child_weight: MIN_SUM_HESSIAN_IN_LEAF,
    };

    boost(ModelFamily::LightGBM, data, settings, |bins, rows, grads| {
        grow_tree(bins, rows, grads, &reg, num_leaves)
    })
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    split: Option<SplitCandidate>,
}

fn grow_tree(bins: &BinnedMatrix, rows: &[usize], grads: &[f64], reg: &Regularization, num_leaves: usize) -> TreeDraft {
    let total: f64 = rows.iter().map(|row| grads[*row]).sum();
    let mut draft = TreeDraft::new(reg.leaf_weight(total, rows.len() as f64));
    let mut leaves = vec![OpenLeaf {
        node: 0,
        rows: rows.to_vec(),
        split: best_split(bins, rows, grads, reg),
    }];

    while leaves.len() < num_leaves {
        // First leaf with the highest gain wins ties.
        let mut chosen: Option<(usize, f64)> = None;
        for (index, leaf) in leaves.iter().enumerate() {
            if let Some(split) = leaf.split {
                if chosen.map_or(true, |(_, gain)| split.gain > gain) {
                    chosen = Some((index, split.gain));
                }
            }
        }
        let Some((index, _)) = chosen else {
            break;
        };

        let leaf = leaves.remove(index);
        let Some(split) = leaf.split else {
            break;
        };
        let (left, right) = draft.split(
            leaf.node,
            split.feature,
            split.threshold,
            reg.leaf_weight(split.left_grad, split.left_count),
            reg.leaf_weight(split.right_grad, split.right_count),
        );
        let (left_rows, right_rows) = partition(bins, &leaf.rows, split.feature, split.bin);
        let left_split = best_split(bins, &left_rows, grads, reg);
        let right_split = best_split(bins, &right_rows, grads, reg);
        leaves.insert(
            index,
            OpenLeaf {
                node: right,
                rows: right_rows,
                split: right_split,
            },
        );
        leaves.insert(
            index,
            OpenLeaf {
                node: left,
                rows: left_rows,
                split: left_split,
            },
        );
    }
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::test_support::step_data;
    use crate::booster::MAX_BINS;

    fn regularization() -> Regularization {
        Regularization {
            l1: 0.0,
            l2: 0.0,
            min_child_samples: MIN_DATA_IN_LEAF,
            min_child_weight: MIN_SUM_HESSIAN_IN_LEAF,
        }
    }

    #[test]
    fn leaf_budget_is_respected() {
        let (features, _) = step_data(400);
        let targets: Vec<f64> = features.iter().map(|row| row[0] * 3.0 + row[1]).collect();
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let rows: Vec<usize> = (0..features.len()).collect();
        let tree = grow_tree(&bins, &rows, &targets, &regularization(), 5).finish(1.0);
        assert!(tree.leaf_count() <= 5);
        assert!(tree.leaf_count() >= 2);
    }

    #[test]
    fn small_samples_cannot_split() {
        let (features, targets) = step_data(30);
        let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
        let rows: Vec<usize> = (0..features.len()).collect();
        let tree = grow_tree(&bins, &rows, &targets, &regularization(), 31).finish(1.0);
        assert_eq!(tree.leaf_count(), 1);
    }
}
