pub mod backoff;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod types;
pub mod vocabulary;
