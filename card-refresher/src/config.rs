use std::time::Duration;

use card_common::config::{CacheConfig, DatabaseConfig, EnvSecsDuration};
use card_engine::topology::AlarmThresholds;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3311")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub cache: CacheConfig,

    #[envconfig(from = "REFRESH_INTERVAL_SECS", default = "60")]
    pub refresh_interval: EnvSecsDuration,

    // Applied to newly derived cards.
    #[envconfig(from = "ICON_ALARM_LEVEL", default = "3")]
    pub icon_alarm_level: i32,

    #[envconfig(from = "POP_ALARM_LEVEL", default = "2")]
    pub pop_alarm_level: i32,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn thresholds(&self) -> AlarmThresholds {
        AlarmThresholds {
            icon_alarm_level: self.icon_alarm_level,
            pop_alarm_level: self.pop_alarm_level,
        }
    }

    /// The loop counts as stalled after missing four refresh intervals.
    pub fn liveness_deadline(&self) -> Duration {
        self.refresh_interval.0 * 4
    }
}
