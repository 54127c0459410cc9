pub mod catalog;
pub mod config;
pub mod market_data;
pub mod persist;
pub mod retry;
pub mod tasks;
pub mod telemetry;
