use anyhow::{Context, Result};
use goldeneyes_platform::ReplayTracker;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("goldeneyesd starting");

    let config = config::Config::from_env();
    let (preset, projector) = config.projector_config()?;
    tracing::info!(
        preset = %preset,
        recording = %config.recording_path.display(),
        interval_ms = config.frame_interval_ms,
        "configuration loaded"
    );

    let tracker = ReplayTracker::new(&config.recording_path, config.frame_interval())
        .looping(config.loop_recording);
    let (engine, engine_thread) = engine::spawn_engine(tracker, projector, config.queue_depth)?;

    if config.start_enabled {
        // Not fatal: clients can enable tracking later over D-Bus.
        if let Err(e) = engine.set_tracking_enabled(true).await {
            tracing::warn!(error = %e, "tracking not started");
        }
    }

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::ProjectorService::new(engine.clone(), preset),
        )?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "goldeneyesd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("goldeneyesd shutting down");

    engine.shutdown().await;
    tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;

    Ok(())
}
