pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod metrics_consts;
pub mod stats;
pub mod stream;
