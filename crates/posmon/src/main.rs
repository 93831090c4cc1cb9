mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use common::{setup_logging, wait_for_resource};
use config::MonitorConfig;
use shmem::{Position2D, RunControl, ValueReader};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};

fn main() -> anyhow::Result<()> {
    let config = MonitorConfig::from_env()?;
    setup_logging(config.environment.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!(?config, "Position monitor starting");

    let run_control = wait_for_resource(
        || RunControl::open(&config.channel),
        config.poll_interval_ms,
        "Run flag",
    );

    // Joining registers us in the round barrier, so hold off until the
    // producer has raised the run flag rather than stalling its rounds
    // while nobody is reading.
    while !shutdown.load(Ordering::Relaxed) && !run_control.is_running() {
        std::thread::sleep(Duration::from_millis(config.poll_interval_ms));
    }
    if shutdown.load(Ordering::Relaxed) {
        return Ok(());
    }

    let mut reader: ValueReader<Position2D> = wait_for_resource(
        || ValueReader::join(&config.channel),
        config.poll_interval_ms,
        "Value channel",
    );

    let result = run(&config, &mut reader, &run_control, &shutdown);

    reader.leave().context("Failed to leave the channel")?;
    tracing::info!("Position monitor stopped");
    result
}

fn run(
    config: &MonitorConfig,
    reader: &mut ValueReader<Position2D>,
    run_control: &RunControl,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(config.read_timeout_ms);
    let mut samples = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        match reader.try_read(timeout) {
            Ok(Some(position)) => {
                samples += 1;
                let json = serde_json::to_string(&position)?;
                if let Some((x_mm, y_mm)) = position.to_world_coords() {
                    tracing::info!(position = %json, x_mm, y_mm, "Sample");
                } else {
                    tracing::info!(position = %json, "Sample");
                }
            }
            Ok(None) => {
                if !run_control.is_running() {
                    tracing::info!("Producer cleared the run flag");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Read failed");
                return Err(e.into());
            }
        }
    }

    tracing::info!(samples, "Monitor loop finished");
    Ok(())
}
