mod bootstrap;
mod health;

use anyhow::Result;
use squadup_core::config::{AppConfig, LogFormat, LoadOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `logging.level` so a single module can be turned up
/// without editing the config file.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);
    serve(config).await
}

async fn serve(config: AppConfig) -> Result<()> {
    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    health::spawn(&server.bind_address, server.health_check_port, app.store.clone()).await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport_mode = app.slack_runner.transport_mode(),
        join_marker = app.coordinator.settings().join_marker.name(),
        "squadup-server started"
    );

    let runner = app.slack_runner.start();
    tokio::pin!(runner);
    tokio::select! {
        outcome = &mut runner => {
            outcome?;
            warn!(
                event_name = "system.server.slack_runner_stopped",
                correlation_id = "bootstrap",
                "slack runner returned; waiting for ctrl-c"
            );
            tokio::signal::ctrl_c().await?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(
                event_name = "system.server.draining",
                correlation_id = "shutdown",
                drain_timeout_secs = server.graceful_shutdown_secs,
                "ctrl-c received; draining in-flight envelopes"
            );
            app.slack_runner.request_shutdown();
            runner.await?;
        }
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        tracked_requests = app.store.len().await,
        "squadup-server stopping; roster state is discarded"
    );
    Ok(())
}
