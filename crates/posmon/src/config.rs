use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub environment: Environment,
    pub channel: String,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl MonitorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let channel = env::var("CHANNEL").unwrap_or_else(|_| "position".to_string());

        let read_timeout_ms = env::var("READ_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        Ok(Self {
            environment,
            channel,
            read_timeout_ms,
            poll_interval_ms,
        })
    }
}
