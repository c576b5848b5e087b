use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::champion::{train_dish, DishOutcome};
use crate::config::PipelineConfig;
use crate::models::DishHistory;
use crate::registry::{registry_path, ChampionRegistry};
use crate::training_status::TrainingStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DishError {
    pub dish: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<DishOutcome>,
    pub errors: Vec<DishError>,
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn leaderboard(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .results
            .iter()
            .map(|result| format!("{}: {}", result.dish, result.leaderboard_line()))
            .collect();
        lines.sort();
        lines
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub country_code: String,
    pub model_dir: PathBuf,
    /// Run dishes inline, in order, on the calling thread.
    pub sequential: bool,
    /// Retrain dishes that already have a registry entry.
    pub retrain_all: bool,
}

struct DishTask {
    history: DishHistory,
}

struct DishResult {
    dish: String,
    outcome: Result<DishOutcome, String>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Trains one dish, turning errors and panics into a per-dish failure.
fn run_dish(history: &DishHistory, country_code: &str, config: &PipelineConfig, model_dir: &Path) -> DishResult {
    let outcome = match catch_unwind(AssertUnwindSafe(|| train_dish(history, country_code, config, model_dir))) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(error)) => Err(format!("{:#}", error)),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload))),
    };
    DishResult {
        dish: history.dish.clone(),
        outcome,
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Trains every dish and writes the merged registry once at the end.
pub fn train_all(
    histories: Vec<DishHistory>,
    config: &PipelineConfig,
    options: &BatchOptions,
    status: &TrainingStatus,
) -> Result<BatchReport> {
    let path = registry_path(&options.model_dir);
    let mut registry = ChampionRegistry::load_or_default(&path)?;

    let mut report = BatchReport::default();
    let mut pending = Vec::with_capacity(histories.len());
    for history in histories {
        if !options.retrain_all && registry.contains(&history.dish) {
            report.skipped.push(history.dish);
        } else {
            pending.push(history);
        }
    }
    if !report.skipped.is_empty() {
        info!(
            "Skipping {} dishes already in the registry (use --retrain-all to retrain)",
            report.skipped.len()
        );
    }

    status.set_phase("Training dishes");
    status.start_batch(pending.len());
    let results = if options.sequential {
        run_sequential(pending, config, options, status)
    } else {
        run_pool(pending, config, options, status)?
    };

    for result in results {
        match result.outcome {
            Ok(outcome) => {
                registry.insert(outcome.dish.clone(), outcome.entry.clone());
                report.results.push(outcome);
            }
            Err(message) => {
                error!("Training failed for {}: {}", result.dish, message);
                report.errors.push(DishError {
                    dish: result.dish,
                    error: message,
                });
            }
        }
    }

    if !report.results.is_empty() {
        registry
            .save(&path)
            .with_context(|| format!("Failed to write registry {}", path.display()))?;
        info!("Registry with {} dishes written to {}", registry.len(), path.display());
    }
    status.set_phase("Training finished");
    Ok(report)
}

fn run_sequential(
    histories: Vec<DishHistory>,
    config: &PipelineConfig,
    options: &BatchOptions,
    status: &TrainingStatus,
) -> Vec<DishResult> {
    let pb = progress_bar(histories.len());
    let mut results = Vec::with_capacity(histories.len());
    for history in &histories {
        status.dish_started(&history.dish);
        let result = run_dish(history, &options.country_code, config, &options.model_dir);
        record_finish(status, &result);
        pb.inc(1);
        results.push(result);
    }
    pb.finish_with_message("Training completed");
    results
}

fn record_finish(status: &TrainingStatus, result: &DishResult) {
    match &result.outcome {
        Ok(outcome) => status.dish_finished(&result.dish, true, outcome.champion_mae),
        Err(_) => status.dish_finished(&result.dish, false, None),
    }
}

fn run_pool(
    histories: Vec<DishHistory>,
    config: &PipelineConfig,
    options: &BatchOptions,
    status: &TrainingStatus,
) -> Result<Vec<DishResult>> {
    let total = histories.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let num_workers = config.max_workers.clamp(1, total);
    info!("Training {} dishes on {} worker threads", total, num_workers);

    let (tx, rx): (Sender<DishTask>, Receiver<DishTask>) = bounded(total);
    let (result_tx, result_rx): (Sender<DishResult>, Receiver<DishResult>) = bounded(total);
    let config = Arc::new(config.clone());

    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let config = Arc::clone(&config);
        let country_code = options.country_code.clone();
        let model_dir = options.model_dir.clone();
        let status = status.clone();

        handles.push(thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let started = Instant::now();
                status.dish_started(&task.history.dish);
                let result = run_dish(&task.history, &country_code, &config, &model_dir);
                match &result.outcome {
                    Ok(outcome) => info!(
                        "Finished {} in {:.1}s: {}",
                        result.dish,
                        started.elapsed().as_secs_f64(),
                        outcome.leaderboard_line()
                    ),
                    Err(message) => warn!(
                        "Finished {} in {:.1}s with error: {}",
                        result.dish,
                        started.elapsed().as_secs_f64(),
                        message
                    ),
                }
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for history in histories {
        tx.send(DishTask { history }).context("Failed to queue dish for training")?;
    }
    drop(tx);

    let heartbeat_every = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    let batch_started = Instant::now();
    let mut last_heartbeat = Instant::now();
    let pb = progress_bar(total);
    let mut results = Vec::with_capacity(total);

    while results.len() < total {
        match result_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(result) => {
                record_finish(status, &result);
                results.push(result);
                pb.set_position(results.len() as u64);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Result channel closed unexpectedly. Some results may be lost.");
                break;
            }
        }
        if last_heartbeat.elapsed() >= heartbeat_every {
            let snapshot = status.snapshot();
            info!(
                "still running... {}/{} done | in-flight={} | elapsed={:.0}s",
                results.len(),
                total,
                snapshot.current_dishes.len(),
                batch_started.elapsed().as_secs_f64()
            );
            last_heartbeat = Instant::now();
        }
    }
    pb.finish_with_message("Training completed");

    for handle in handles {
        if handle.join().is_err() {
            warn!("A training worker exited abnormally");
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailySale, RawDay};
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn short_history(dish: &str, days: i64) -> DishHistory {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let sales: Vec<DailySale> = (0..days)
            .map(|offset| DailySale {
                date: start + ChronoDuration::days(offset),
                quantity: 2.0,
            })
            .collect();
        DishHistory::from_sales(dish, &sales, &Default::default())
    }

    fn options(dir: &Path, sequential: bool) -> BatchOptions {
        BatchOptions {
            country_code: "CN".to_string(),
            model_dir: dir.to_path_buf(),
            sequential,
            retrain_all: false,
        }
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let broken = DishHistory {
            dish: "Broken".to_string(),
            days: Vec::<RawDay>::new(),
        };
        let histories = vec![short_history("Rice", 10), broken, short_history("Soup", 12)];
        let report = train_all(histories, &PipelineConfig::default(), &options(dir.path(), false), &TrainingStatus::new()).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].dish, "Broken");
        let registry = ChampionRegistry::load(&registry_path(dir.path())).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn incremental_runs_skip_known_dishes() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let status = TrainingStatus::new();
        train_all(vec![short_history("Rice", 10)], &config, &options(dir.path(), true), &status).unwrap();
        let report = train_all(
            vec![short_history("Rice", 10), short_history("Tea", 5)],
            &config,
            &options(dir.path(), true),
            &status,
        )
        .unwrap();
        assert_eq!(report.skipped, vec!["Rice".to_string()]);
        assert_eq!(report.results.len(), 1);
        assert_eq!(ChampionRegistry::load(&registry_path(dir.path())).unwrap().len(), 2);
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(5u8)), "unknown panic");
    }
}
