use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct TrainingStatus {
    inner: Arc<Mutex<TrainingStatusData>>,
}

#[derive(Default)]
struct TrainingStatusData {
    phase: String,
    total_dishes: usize,
    completed_dishes: usize,
    failed_dishes: usize,
    current_dishes: Vec<String>,
    best_mae: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatusSnapshot {
    pub phase: String,
    pub total_dishes: usize,
    pub completed_dishes: usize,
    pub failed_dishes: usize,
    pub current_dishes: Vec<String>,
    pub best_mae: Option<f64>,
}

impl TrainingStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrainingStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn start_batch(&self, total_dishes: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_dishes = total_dishes;
            data.completed_dishes = 0;
            data.failed_dishes = 0;
            data.current_dishes.clear();
            data.best_mae = None;
        }
    }

    pub fn dish_started(&self, dish: &str) {
        if let Ok(mut data) = self.inner.lock() {
            data.current_dishes.push(dish.to_string());
        }
    }

    /// Marks a dish finished; `mae` is its champion score when it succeeded.
    pub fn dish_finished(&self, dish: &str, succeeded: bool, mae: Option<f64>) {
        if let Ok(mut data) = self.inner.lock() {
            data.current_dishes.retain(|current| current != dish);
            data.completed_dishes += 1;
            if !succeeded {
                data.failed_dishes += 1;
            }
            if let Some(value) = mae.filter(|value| value.is_finite()) {
                data.best_mae = Some(data.best_mae.map_or(value, |best| best.min(value)));
            }
        }
    }

    pub fn snapshot(&self) -> TrainingStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            TrainingStatusSnapshot {
                phase: data.phase.clone(),
                total_dishes: data.total_dishes,
                completed_dishes: data.completed_dishes,
                failed_dishes: data.failed_dishes,
                current_dishes: data.current_dishes.clone(),
                best_mae: data.best_mae,
            }
        } else {
            TrainingStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_dishes: 0,
                completed_dishes: 0,
                failed_dishes: 0,
                current_dishes: Vec::new(),
                best_mae: None,
            }
        }
    }
}
