pub mod app;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
