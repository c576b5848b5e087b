pub mod booster;
pub mod cache;
pub mod champion;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod features;
pub mod folds;
pub mod forecaster;
pub mod holidays;
pub mod http_client;
pub mod location;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod param_utils;
pub mod registry;
pub mod retry;
pub mod sales_data;
pub mod sampler;
pub mod training_status;
pub mod trend;
pub mod weather;
