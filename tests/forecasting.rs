use chrono::{Duration, NaiveDate};
use dish_forecast::booster::{BinnedMatrix, ModelFamily, TrainingSet, TreeEnsemble, MAX_BINS};
use dish_forecast::config::TrendParams;
use dish_forecast::features::FeatureLayout;
use dish_forecast::forecaster::{FutureWeather, RecursiveForecaster};
use dish_forecast::holidays::HolidayCalendar;
use dish_forecast::models::WeatherValues;
use dish_forecast::param_utils::ParamSet;
use dish_forecast::registry::DishModelArtifact;
use dish_forecast::trend::{TrendInput, TrendModel};
use std::collections::BTreeMap;

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + Duration::days(offset)
}

fn trend_inputs(offsets: std::ops::Range<i64>) -> Vec<TrendInput> {
    offsets
        .map(|offset| TrendInput {
            date: day(offset),
            is_holiday: false,
            weather: WeatherValues::from_array([20.0 + (offset % 5) as f64, 12.0, 60.0, (offset % 3) as f64]),
        })
        .collect()
}

fn flat_trend(level: f64) -> TrendModel {
    let rows = trend_inputs(-90..0);
    TrendModel::fit(&rows, &vec![level; rows.len()], &TrendParams::default()).unwrap()
}

/// A small ensemble fitted on synthetic residuals that depend on the lag and
/// weather columns, so forecasts actually react to history and weather.
fn fitted_ensemble(family: ModelFamily, layout: &FeatureLayout) -> TreeEnsemble {
    let count = layout.feature_count();
    let mut features = Vec::new();
    let mut targets = Vec::new();
    for row in 0..160 {
        let mut values: Vec<f64> = (0..count).map(|column| ((row * 7 + column * 3) % 11) as f64).collect();
        values[count - 2] = (row % 13) as f64;
        targets.push(values[6] * 0.3 - values[count - 2] * 0.2 + (row % 4) as f64 * 0.1);
        features.push(values);
    }
    let bins = BinnedMatrix::from_rows(&features, MAX_BINS).unwrap();
    let training = TrainingSet::new(&features, &targets, &bins).unwrap();
    family.fit(&ParamSet::new(), &training, 15, 7).unwrap()
}

fn forecaster<'a>(
    trend: &'a TrendModel,
    ensemble: &'a TreeEnsemble,
    layout: &'a FeatureLayout,
    calendar: &'a HolidayCalendar,
) -> RecursiveForecaster<'a> {
    RecursiveForecaster {
        trend,
        ensemble,
        layout,
        calendar,
        historical_mae: Some(1.5),
        with_attribution: false,
    }
}

fn weather_for(offsets: std::ops::Range<i64>) -> BTreeMap<NaiveDate, WeatherValues> {
    offsets
        .map(|offset| {
            (
                day(offset),
                WeatherValues::from_array([25.0 + offset as f64, 18.0, 70.0, offset as f64 * 0.5]),
            )
        })
        .collect()
}

#[test]
fn flat_trend_with_zero_residual_repeats_the_level() {
    let trend = flat_trend(10.0);
    let layout = FeatureLayout::default();
    let ensemble = TreeEnsemble::constant(ModelFamily::XGBoost, 0.0, layout.feature_count());
    let calendar = HolidayCalendar::empty();
    let weather = FutureWeather::new(BTreeMap::new(), trend.regressor_means());

    let mut history = vec![10.0; 30];
    let points = forecaster(&trend, &ensemble, &layout, &calendar).run(day(0), 3, &weather, &mut history);

    assert_eq!(points.len(), 3);
    for point in &points {
        assert!((point.trend_prediction - 10.0).abs() < 1e-6);
        assert!((point.combined_prediction - 10.0).abs() < 1e-6);
    }
    assert_eq!(history.len(), 33);
    assert!(history[30..].iter().all(|value| (value - 10.0).abs() < 1e-6));
}

#[test]
fn single_value_history_fills_every_lag() {
    let layout = FeatureLayout::default();
    let features = layout.history_features(&[5.0]).unwrap();
    assert_eq!(&features[..3], &[5.0, 5.0, 5.0]);
    for pair in features[3..].chunks(2) {
        assert_eq!(pair, &[5.0, 0.0]);
    }
    assert!(layout.history_features(&[]).is_none());
}

#[test]
fn longer_horizon_extends_a_shorter_one() {
    let trend = flat_trend(12.0);
    let layout = FeatureLayout::default();
    let ensemble = fitted_ensemble(ModelFamily::LightGBM, &layout);
    let calendar = HolidayCalendar::empty();
    let weather = FutureWeather::new(weather_for(0..10), trend.regressor_means());
    let seed: Vec<f64> = (0..21).map(|index| 8.0 + (index % 7) as f64).collect();

    let model = forecaster(&trend, &ensemble, &layout, &calendar);
    let short = model.run(day(0), 3, &weather, &mut seed.clone());
    let long = model.run(day(0), 8, &weather, &mut seed.clone());
    assert_eq!(&long[..3], &short[..]);
}

#[test]
fn weather_is_matched_by_date_not_position() {
    let trend = flat_trend(12.0);
    let layout = FeatureLayout::default();
    let ensemble = fitted_ensemble(ModelFamily::XGBoost, &layout);
    let calendar = HolidayCalendar::empty();
    let model = forecaster(&trend, &ensemble, &layout, &calendar);
    let seed = vec![11.0; 14];

    let exact = FutureWeather::new(weather_for(0..5), trend.regressor_means());
    let padded = FutureWeather::new(weather_for(-10..15), trend.regressor_means());
    let a = model.run(day(0), 5, &exact, &mut seed.clone());
    let b = model.run(day(0), 5, &padded, &mut seed.clone());
    assert_eq!(a, b);
}

#[test]
fn forecasts_never_go_negative() {
    let trend = flat_trend(1.0);
    let layout = FeatureLayout::default();
    let ensemble = TreeEnsemble::constant(ModelFamily::CatBoost, -25.0, layout.feature_count());
    let calendar = HolidayCalendar::empty();
    let weather = FutureWeather::new(BTreeMap::new(), trend.regressor_means());
    let mut history = vec![1.0; 10];
    let points = forecaster(&trend, &ensemble, &layout, &calendar).run(day(0), 10, &weather, &mut history);
    assert!(points.iter().all(|point| point.combined_prediction == 0.0 && point.lower_bound == 0.0));
    assert!(history[10..].iter().all(|value| *value == 0.0));
}

#[test]
fn artifact_round_trip_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model_Fried_Rice.bin");
    let layout = FeatureLayout::default();
    let rows = trend_inputs(-120..0);
    let targets: Vec<f64> = (0..rows.len()).map(|index| 10.0 + (index % 7) as f64 + index as f64 * 0.02).collect();
    let trend = TrendModel::fit(&rows, &targets, &TrendParams::default()).unwrap();
    let ensemble = fitted_ensemble(ModelFamily::CatBoost, &layout);

    let artifact = DishModelArtifact::new("Fried Rice", trend, ensemble, layout, "CN", vec![2025]);
    artifact.save(&path).unwrap();
    let loaded = DishModelArtifact::load(&path).unwrap();
    assert_eq!(loaded, artifact);

    let future = trend_inputs(0..14);
    assert_eq!(loaded.trend.predict(&future), artifact.trend.predict(&future));

    let calendar = artifact.calendar(day(0), day(14));
    let weather = FutureWeather::new(weather_for(0..14), artifact.trend.regressor_means());
    let seed = vec![12.0; 28];
    let original = forecaster(&artifact.trend, &artifact.ensemble, &artifact.layout, &calendar).run(
        day(0),
        14,
        &weather,
        &mut seed.clone(),
    );
    let reloaded = forecaster(&loaded.trend, &loaded.ensemble, &loaded.layout, &calendar).run(
        day(0),
        14,
        &weather,
        &mut seed.clone(),
    );
    assert_eq!(original, reloaded);
}
