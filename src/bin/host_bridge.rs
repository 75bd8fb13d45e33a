//! Headless host bridge for the background update engine.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin and
//! writes `ResponseEnvelope` and `EventEnvelope` messages to stdout. Wake
//! timers run in-process.
//!
//! All tracing output goes to stderr so stdout stays a clean protocol
//! channel.
//!
//! Environment:
//! - `NATIVE_UPDATE_CONFIG`: optional TOML config enabled at startup
//! - `NATIVE_UPDATE_CONFIG_DIR`: override for the status file directory
//! - `RUST_LOG`: tracing filter, `info` by default

use anyhow::Context;
use native_update::BackgroundUpdateConfig;
use native_update::device::{DeviceState, NetworkType, StaticDeviceState};
use native_update::host::stdio::run_stdio_bridge;
use native_update::notifications::LogNotifier;
use native_update::paths;
use native_update::scheduler::{BackgroundUpdater, Collaborators, StatusTracker, TokioWakeScheduler};
use native_update::update::NoopDetector;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFIG_ENV: &str = "NATIVE_UPDATE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "native-update-host starting");

    let initial_config = load_initial_config()?;

    let status_path = paths::status_file();
    tracing::debug!(path = %status_path.display(), "using status file");
    let status = Arc::new(StatusTracker::with_state_path(status_path));

    let (wake, wake_rx) = TokioWakeScheduler::new();
    let collaborators = Collaborators {
        app_detector: Arc::new(NoopDetector),
        live_detector: Arc::new(NoopDetector),
        notifier: Arc::new(LogNotifier::new()),
        // Desktop hosts run on mains power and an unmetered link.
        device: Arc::new(StaticDeviceState(DeviceState::new(100, NetworkType::Unmetered))),
    };
    let updater = Arc::new(BackgroundUpdater::new(collaborators, Arc::new(wake), status));

    let shutdown = CancellationToken::new();
    let wake_loop = Arc::clone(&updater).run(wake_rx, shutdown.clone());

    if let Some(config) = initial_config {
        updater
            .enable(config)
            .context("cannot enable initial configuration")?;
    }

    let bridge_result = run_stdio_bridge(Arc::clone(&updater)).await;

    shutdown.cancel();
    let _ = wake_loop.await;

    bridge_result.map_err(|e| {
        tracing::error!(error = %e, "native-update-host exited with error");
        anyhow::anyhow!("native-update-host failed: {e}")
    })?;

    tracing::info!("native-update-host shut down cleanly");
    Ok(())
}

fn load_initial_config() -> anyhow::Result<Option<BackgroundUpdateConfig>> {
    let Some(path) = std::env::var_os(CONFIG_ENV) else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {CONFIG_ENV} file {}", path.to_string_lossy()))?;
    let config = BackgroundUpdateConfig::from_toml_str(&raw)?;
    tracing::info!(path = %path.to_string_lossy(), "loaded initial configuration");
    Ok(Some(config))
}
