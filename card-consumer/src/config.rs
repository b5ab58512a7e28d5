use std::time::Duration;

use card_common::config::{
    BackoffConfig, CacheConfig, DatabaseConfig, EnvMsDuration, EnvSecsDuration, NonEmptyString,
};
use envconfig::Envconfig;
use uuid::Uuid;

use crate::consumer::ConsumerSettings;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub cache: CacheConfig,

    #[envconfig(nested = true)]
    pub backoff: BackoffConfig,

    #[envconfig(from = "STREAM_KEY", default = "telemetry:events")]
    pub stream_key: NonEmptyString,

    #[envconfig(from = "CONSUMER_GROUP", default = "card-fusion")]
    pub consumer_group: NonEmptyString,

    // Must be stable across restarts of the same replica so its pending entries are reused.
    pub consumer_name: Option<NonEmptyString>,

    #[envconfig(from = "BATCH_SIZE", default = "64")]
    pub batch_size: usize,

    #[envconfig(from = "BLOCK_TIMEOUT_MS", default = "2000")]
    pub block_timeout: EnvMsDuration,

    #[envconfig(from = "CLAIM_INTERVAL_MS", default = "30000")]
    pub claim_interval: EnvMsDuration,

    #[envconfig(from = "CLAIM_MIN_IDLE_MS", default = "60000")]
    pub claim_min_idle: EnvMsDuration,

    #[envconfig(from = "CLAIM_BATCH_SIZE", default = "100")]
    pub claim_batch_size: usize,

    #[envconfig(from = "MAX_DELIVERIES", default = "5")]
    pub max_deliveries: u64,

    #[envconfig(from = "STATS_REPORT_INTERVAL_SECS", default = "60")]
    pub stats_report_interval: EnvSecsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .as_ref()
            .map(|name| name.as_str().to_owned())
            .unwrap_or_else(|| format!("card-consumer-{}", Uuid::now_v7()))
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            batch_size: self.batch_size,
            block_timeout: self.block_timeout.0,
            claim_interval: self.claim_interval.0,
            claim_min_idle: self.claim_min_idle.0,
            claim_batch_size: self.claim_batch_size,
            max_deliveries: self.max_deliveries,
        }
    }

    /// Deadline for the consumer loop's liveness reports: one blocking read plus the longest
    /// backoff sleep, with room to spare.
    pub fn liveness_deadline(&self) -> Duration {
        (self.block_timeout.0 + self.backoff.maximum_interval.0) * 2
    }
}
