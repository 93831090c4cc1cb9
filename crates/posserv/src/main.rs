mod config;

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use common::setup_logging;
use config::ServerConfig;
use shmem::{Position2D, RunControl, RunState, ValueWriter};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    setup_logging(config.environment.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");
    tracing::info!(?config, "Position server starting");

    let mut writer: ValueWriter<Position2D> = ValueWriter::bind(&config.channel)
        .with_context(|| format!("Failed to bind value channel '{}'", config.channel))?;

    let run_control = RunControl::open(&config.channel)
        .context("Failed to create run flag in shared memory (/dev/shm)")?;
    run_control.set(RunState::Running);

    tracing::info!(channel = %config.channel, "Value channel bound, run flag set");

    let result = run(&config, &mut writer, &shutdown);

    run_control.set(RunState::Stopped);
    tracing::info!("Position server stopped, run flag cleared");
    result
}

/// Publish a synthetic circular trajectory until a shutdown signal arrives.
/// Stands in for a detector stage while exercising the same channel path.
fn run(
    config: &ServerConfig,
    writer: &mut ValueWriter<Position2D>,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let period = Duration::from_secs_f64(1.0 / config.sample_rate_hz.max(0.001));
    let timeout = Duration::from_millis(config.publish_timeout_ms);
    let start = Instant::now();
    let mut samples = 0u64;
    let mut stalled_rounds = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let t = start.elapsed().as_secs_f64();
        let theta = (t * config.sample_rate_hz / 100.0) * TAU;
        let mut position = Position2D::at_pixel(
            320.0 + 100.0 * theta.cos(),
            240.0 + 100.0 * theta.sin(),
        );
        if config.mm_per_px > 0.0 {
            position = position.with_calibration(config.mm_per_px, config.mm_per_px, 0.0, 0.0);
        }

        // Retry the same sample until every consumer has drained the
        // previous round or we are asked to shut down.
        loop {
            match writer.publish(&position, timeout) {
                Ok(true) => break,
                Ok(false) => {
                    stalled_rounds += 1;
                    if stalled_rounds.is_multiple_of(50) {
                        tracing::warn!(
                            consumers = writer.participant_count(),
                            stalled_rounds,
                            "Consumers are not draining rounds"
                        );
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Publish failed");
                    return Err(e.into());
                }
            }
        }

        samples += 1;
        if samples.is_multiple_of(1000) {
            tracing::info!(
                samples,
                consumers = writer.participant_count(),
                "Publishing positions"
            );
        }

        std::thread::sleep(period);
    }

    tracing::info!(samples, "Shutdown signal received");
    Ok(())
}
