use anyhow::Result;
use chrono::Duration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::domain::{ForecastHorizon, Site};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub weather: WeatherConfig,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[cfg(feature = "db")]
    #[serde(default)]
    pub db: Option<DbConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum run attempts before a window is abandoned as exhausted.
    pub max_attempts: u32,
    /// Per-call bound on weather feed and model invocations (seconds).
    pub call_timeout_secs: u64,
    /// Delay between retry attempts (milliseconds).
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout_secs: 30,
            retry_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Per-horizon scheduling policy.
#[derive(Debug, Clone, Deserialize)]
pub struct HorizonPolicy {
    /// Forecast freshness lifetime (seconds).
    pub ttl_secs: i64,
    /// How many whole windows back the missed-window sweep looks.
    pub backfill_windows: u32,
}

impl HorizonPolicy {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub hourly: HorizonPolicy,
    pub daily: HorizonPolicy,
    pub weekly: HorizonPolicy,
}

impl SchedulerConfig {
    pub fn policy(&self, horizon: ForecastHorizon) -> &HorizonPolicy {
        match horizon {
            ForecastHorizon::Hourly => &self.hourly,
            ForecastHorizon::Daily => &self.daily,
            ForecastHorizon::Weekly => &self.weekly,
        }
    }

    pub fn ttl(&self, horizon: ForecastHorizon) -> Duration {
        self.policy(horizon).ttl()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hourly: HorizonPolicy {
                ttl_secs: 900,
                backfill_windows: 6,
            },
            daily: HorizonPolicy {
                ttl_secs: 21_600,
                backfill_windows: 3,
            },
            weekly: HorizonPolicy {
                ttl_secs: 86_400,
                backfill_windows: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    pub base_url: String,
    pub http_timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com/v1".to_string(),
            http_timeout_secs: 30,
        }
    }
}

#[cfg(feature = "db")]
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("GRIDCAST__").split("__"));
        Ok(figment.extract()?)
    }
}
