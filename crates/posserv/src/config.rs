use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub environment: Environment,
    pub channel: String,
    pub sample_rate_hz: f64,
    pub publish_timeout_ms: u64,
    pub mm_per_px: f64,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let channel = env::var("CHANNEL").unwrap_or_else(|_| "position".to_string());

        let sample_rate_hz = env::var("SAMPLE_RATE_HZ")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30.0);

        let publish_timeout_ms = env::var("PUBLISH_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let mm_per_px = env::var("MM_PER_PX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        Ok(Self {
            environment,
            channel,
            sample_rate_hz,
            publish_timeout_ms,
            mm_per_px,
        })
    }
}
