//! Per-dish training pipeline: folds, search per family, champion selection
//! and the production retrain on the full history.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::booster::{BinnedMatrix, ModelFamily, TrainingSet, MAX_BINS};
use crate::config::PipelineConfig;
use crate::features::{sanitize_slice, FeatureLayout, SanitizedDay};
use crate::folds::{build_folds, fit_trend, ResidualDataset};
use crate::holidays::{calendar_years, HolidayCalendar};
use crate::models::{DailySale, DishHistory};
use crate::optimizer::{round_to, search_family, SearchOutcome};
use crate::registry::{
    average_path, model_path, recent_sales_path, write_json, AverageArtifact, Champion, DishModelArtifact,
    RecentSalesSnapshot, RegistryEntry,
};

/// Lowest finite MAE wins; equal scores keep the earlier family in
/// `ModelFamily::ALL`.
pub fn select_champion(outcomes: &[SearchOutcome]) -> Option<(ModelFamily, f64)> {
    let mut best: Option<(ModelFamily, f64)> = None;
    for family in ModelFamily::ALL {
        let Some(outcome) = outcomes.iter().find(|outcome| outcome.family == family) else {
            continue;
        };
        if !outcome.best_mae.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, mae)| outcome.best_mae < mae) {
            best = Some((family, outcome.best_mae));
        }
    }
    best
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DishOutcome {
    pub dish: String,
    pub champion: Champion,
    pub champion_mae: Option<f64>,
    pub searches: Vec<SearchOutcome>,
    pub fold_count: usize,
    pub fallback_reason: Option<String>,
    #[serde(skip)]
    pub entry: RegistryEntry,
}

impl DishOutcome {
    /// `X=1.23 C=1.10 L=inf -> Trend+CatBoost`
    pub fn leaderboard_line(&self) -> String {
        let scores: Vec<String> = ModelFamily::ALL
            .iter()
            .map(|family| {
                let mae = self
                    .searches
                    .iter()
                    .find(|outcome| outcome.family == *family)
                    .map(|outcome| outcome.best_mae);
                let initial = &family.label()[..1];
                match mae {
                    Some(value) if value.is_finite() => format!("{}={:.2}", initial, value),
                    Some(_) => format!("{}=inf", initial),
                    None => format!("{}=-", initial),
                }
            })
            .collect();
        let winner = match self.champion {
            Champion::Hybrid(family) => format!("Trend+{}", family.label()),
            Champion::Average => "Average".to_string(),
        };
        format!("{} -> {}", scores.join(" "), winner)
    }
}

/// Trains one dish end to end and writes its artifacts into `model_dir`.
/// The registry itself is written by the caller.
pub fn train_dish(
    history: &DishHistory,
    country_code: &str,
    config: &PipelineConfig,
    model_dir: &Path,
) -> Result<DishOutcome> {
    let (Some(first), Some(last)) = (history.first_date(), history.last_date()) else {
        return Err(anyhow!("Dish '{}' has no sales history", history.dish));
    };
    let years = calendar_years(&config.holiday_years, first, last);
    let calendar = HolidayCalendar::resolve(country_code, years.clone());
    let layout = FeatureLayout::from_config(config);
    let full = sanitize_slice(&history.days);

    let span = history.span_days();
    if span < config.min_ml_days as i64 {
        let reason = format!("history spans {} days (< {})", span, config.min_ml_days);
        return train_average(history, &full, config, model_dir, reason, Vec::new(), 0);
    }

    info!("{}: building folds", history.dish);
    let folds = build_folds(history, &calendar, &layout, config)
        .with_context(|| format!("Failed to build folds for {}", history.dish))?;
    if folds.is_empty() {
        return train_average(history, &full, config, model_dir, "no cross-validation fold survived".to_string(), Vec::new(), 0);
    }

    let mut searches = Vec::with_capacity(ModelFamily::ALL.len());
    for family in ModelFamily::ALL {
        info!("{}: searching {} over {} folds", history.dish, family, folds.len());
        let outcome = search_family(family, &folds, config.n_trials, config.n_estimators, config.random_seed)
            .with_context(|| format!("{} search failed for {}", family, history.dish))?;
        searches.push(outcome);
    }

    let Some((family, champion_mae)) = select_champion(&searches) else {
        return train_average(
            history,
            &full,
            config,
            model_dir,
            "no family produced a finite score".to_string(),
            searches,
            folds.len(),
        );
    };
    let fold_count = folds.len();
    drop(folds);

    info!("{}: retraining {} on {} days", history.dish, family, full.len());
    let (trend, trend_fit) = fit_trend(&full, &calendar, &config.trend)
        .with_context(|| format!("Failed to fit production trend for {}", history.dish))?;
    let dataset = ResidualDataset::from_days(&full, 0..full.len(), &trend_fit, &calendar, &layout);
    if dataset.is_empty() {
        return Err(anyhow!("Dish '{}' has no rows with complete features", history.dish));
    }
    let bins = BinnedMatrix::from_rows(&dataset.features, MAX_BINS)?;
    let training = TrainingSet::new(&dataset.features, &dataset.residuals, &bins)?;
    let best_params = searches
        .iter()
        .find(|outcome| outcome.family == family)
        .map(|outcome| outcome.best_params.clone())
        .unwrap_or_default();
    let ensemble = family.fit(&best_params, &training, config.n_estimators, config.random_seed)?;

    let artifact = DishModelArtifact::new(&history.dish, trend, ensemble, layout, calendar.country_code(), years);
    artifact.save(&model_path(model_dir, &history.dish))?;
    write_recent_sales(history, &full, config, model_dir)?;

    let champion = Champion::Hybrid(family);
    let entry = registry_entry(champion, Some(champion_mae), &searches);
    info!("{}: champion {} (MAE {:.4})", history.dish, family, champion_mae);
    Ok(DishOutcome {
        dish: history.dish.clone(),
        champion,
        champion_mae: Some(champion_mae),
        searches,
        fold_count,
        fallback_reason: None,
        entry,
    })
}

fn train_average(
    history: &DishHistory,
    full: &[SanitizedDay],
    config: &PipelineConfig,
    model_dir: &Path,
    reason: String,
    searches: Vec<SearchOutcome>,
    fold_count: usize,
) -> Result<DishOutcome> {
    warn!("{}: using historical average ({})", history.dish, reason);
    let mean = if full.is_empty() {
        0.0
    } else {
        full.iter().map(|day| day.quantity).sum::<f64>() / full.len() as f64
    };
    let artifact = AverageArtifact {
        dish: history.dish.clone(),
        mean: round_to(mean, 2),
        trained_at: Utc::now(),
    };
    write_json(&average_path(model_dir, &history.dish), &artifact)?;
    write_recent_sales(history, full, config, model_dir)?;

    let entry = registry_entry(Champion::Average, None, &searches);
    Ok(DishOutcome {
        dish: history.dish.clone(),
        champion: Champion::Average,
        champion_mae: None,
        searches,
        fold_count,
        fallback_reason: Some(reason),
        entry,
    })
}

fn write_recent_sales(
    history: &DishHistory,
    full: &[SanitizedDay],
    config: &PipelineConfig,
    model_dir: &Path,
) -> Result<()> {
    let start = full.len().saturating_sub(config.recent_sales_days);
    let snapshot = RecentSalesSnapshot {
        dish: history.dish.clone(),
        sales: full[start..]
            .iter()
            .map(|day| DailySale {
                date: day.date,
                quantity: day.quantity,
            })
            .collect(),
    };
    write_json(&recent_sales_path(model_dir, &history.dish), &snapshot)
}

fn registry_entry(champion: Champion, champion_mae: Option<f64>, searches: &[SearchOutcome]) -> RegistryEntry {
    let family_mae: BTreeMap<ModelFamily, Option<f64>> = searches
        .iter()
        .map(|outcome| (outcome.family, Some(outcome.best_mae).filter(|mae| mae.is_finite())))
        .collect();
    let best_params = searches
        .iter()
        .map(|outcome| (outcome.family, outcome.best_params.clone()))
        .collect();
    RegistryEntry {
        champion,
        champion_mae,
        family_mae,
        best_params,
        model_type: champion.model_type().to_string(),
        trained_at: Utc::now(),
    }
}
