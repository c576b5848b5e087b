use anyhow::Result;
use log::info;

use crate::context::AppContext;
use crate::registry::{champion_counts, Champion};

pub fn run(app: &AppContext, store_id: Option<i64>) -> Result<()> {
    let store = app.model_store(store_id);
    let entries = store.list_dishes()?;
    println!("{:<32} {:<18} {:>10}  {}", "Dish", "Champion", "MAE", "Trained at");
    for (dish, entry) in &entries {
        let mae = entry
            .champion_mae
            .map(|value| format!("{:.4}", value))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:<18} {:>10}  {}",
            dish,
            entry.champion.label(),
            mae,
            entry.trained_at.format("%Y-%m-%d %H:%M")
        );
    }

    let registry = store.registry()?;
    let counts = champion_counts(&registry);
    let mut champions: Vec<Champion> = counts.keys().copied().collect();
    champions.sort_by_key(|champion| champion.as_str());
    for champion in champions {
        info!("{}: {} dishes", champion.label(), counts[&champion]);
    }
    Ok(())
}
