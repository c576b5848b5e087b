use anyhow::Result;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::booster::ModelFamily;
use crate::folds::FoldCache;
use crate::param_utils::{clamp_to_space, ParamSet};
use crate::sampler::{TpeSampler, Trial};

/// Best result of one family's search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub family: ModelFamily,
    pub best_mae: f64,
    pub best_params: ParamSet,
    pub trials: usize,
}

pub fn mae(predictions: &[f64], actuals: &[f64]) -> f64 {
    if actuals.is_empty() {
        return f64::INFINITY;
    }
    predictions
        .iter()
        .zip(actuals)
        .map(|(prediction, actual)| (prediction - actual).abs())
        .sum::<f64>()
        / actuals.len() as f64
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Mean over folds of the MAE of `max(0, trend + residual)` against actuals.
/// Infinite when there are no folds or any fold fails to fit.
pub fn objective(
    family: ModelFamily,
    params: &ParamSet,
    folds: &[FoldCache],
    n_estimators: usize,
    seed: u64,
) -> f64 {
    if folds.is_empty() {
        return f64::INFINITY;
    }
    let fold_scores: Vec<Result<f64>> = folds
        .par_iter()
        .map(|fold| fold_mae(family, params, fold, n_estimators, seed))
        .collect();

    let mut total = 0.0;
    for score in fold_scores {
        match score {
            Ok(value) if value.is_finite() => total += value,
            Ok(_) => return f64::INFINITY,
            Err(error) => {
                debug!("{} trial failed on a fold: {:#}", family, error);
                return f64::INFINITY;
            }
        }
    }
    total / folds.len() as f64
}

fn fold_mae(family: ModelFamily, params: &ParamSet, fold: &FoldCache, n_estimators: usize, seed: u64) -> Result<f64> {
    let model = family.fit(params, &fold.training_set()?, n_estimators, seed)?;
    let predictions: Vec<f64> = fold
        .test
        .features
        .iter()
        .zip(&fold.test.trend)
        .map(|(row, trend)| (trend + model.predict(row)).max(0.0))
        .collect();
    Ok(mae(&predictions, &fold.test.actuals))
}

/// Runs `n_trials` sequential TPE trials for one family.
pub fn search_family(
    family: ModelFamily,
    folds: &[FoldCache],
    n_trials: usize,
    n_estimators: usize,
    seed: u64,
) -> Result<SearchOutcome> {
    let space = family.search_space();
    let mut sampler = TpeSampler::new(seed)?;
    let mut history: Vec<Trial> = Vec::with_capacity(n_trials);
    let mut best: Option<usize> = None;

    for trial_index in 0..n_trials {
        let mut params = sampler.suggest(space, &history);
        clamp_to_space(&mut params, space);
        let value = objective(family, &params, folds, n_estimators, seed);
        let value = if value.is_finite() { value } else { f64::INFINITY };
        if best.map_or(true, |index| value < history[index].value) {
            best = Some(trial_index);
        }
        history.push(Trial { params, value });
    }

    let (best_mae, best_params) = match best {
        Some(index) => (history[index].value, history[index].params.clone()),
        None => (f64::INFINITY, ParamSet::new()),
    };
    info!("{} search finished: best MAE {:.4} after {} trials", family, best_mae, history.len());

    Ok(SearchOutcome {
        family,
        best_mae: round_to(best_mae, 4),
        best_params,
        trials: history.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::features::FeatureLayout;
    use crate::folds::build_folds;
    use crate::holidays::HolidayCalendar;
    use crate::models::{DishHistory, RawDay, WEATHER_FIELD_COUNT};
    use chrono::{Duration, NaiveDate};

    fn weekly_folds() -> Vec<FoldCache> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let history = DishHistory {
            dish: "Dumplings".to_string(),
            days: (0..150)
                .map(|offset| RawDay {
                    date: start + Duration::days(offset),
                    quantity: Some(if offset % 7 >= 5 { 30.0 } else { 12.0 }),
                    weather: [Some(18.0); WEATHER_FIELD_COUNT],
                })
                .collect(),
        };
        build_folds(&history, &HolidayCalendar::empty(), &FeatureLayout::default(), &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn mae_of_empty_actuals_is_infinite() {
        assert_eq!(mae(&[], &[]), f64::INFINITY);
        assert!((mae(&[1.0, 3.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_folds_scores_infinity() {
        assert_eq!(objective(ModelFamily::XGBoost, &ParamSet::new(), &[], 10, 1), f64::INFINITY);
    }

    #[test]
    fn search_is_reproducible_for_a_seed() {
        let folds = weekly_folds();
        assert!(!folds.is_empty());
        let first = search_family(ModelFamily::LightGBM, &folds, 4, 10, 42).unwrap();
        let second = search_family(ModelFamily::LightGBM, &folds, 4, 10, 42).unwrap();
        assert_eq!(first, second);
        assert!(first.best_mae.is_finite());
        assert_eq!(first.trials, 4);
    }

    #[test]
    fn best_mae_is_rounded() {
        assert_eq!(round_to(1.234_567, 4), 1.2346);
        assert_eq!(round_to(f64::INFINITY, 4), f64::INFINITY);
    }
}
