use std::sync::Arc;
use std::time::Duration;

use squadup_core::config::{AppConfig, ConfigError};
use squadup_core::{CoordinatorSettings, MatchCoordinator, Messenger, MessengerError, RosterStore};
use squadup_slack::events::match_dispatcher;
use squadup_slack::socket::{ReconnectPolicy, SocketModeRunner, WebSocketTransport};
use squadup_slack::web::SlackWebClient;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub store: Arc<RosterStore>,
    pub coordinator: Arc<MatchCoordinator>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack client setup failed: {0}")]
    SlackClient(#[source] MessengerError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let client = Arc::new(
        SlackWebClient::new(
            config.slack.api_base_url.as_str(),
            config.slack.bot_token.clone(),
            config.slack.app_token.clone(),
        )
        .map_err(BootstrapError::SlackClient)?,
    );
    info!(
        event_name = "system.bootstrap.slack_client_ready",
        correlation_id = "bootstrap",
        api_base_url = %config.slack.api_base_url,
        "slack web client initialized"
    );

    let store = Arc::new(RosterStore::new());
    let messenger: Arc<dyn Messenger> = client.clone();
    let settings = CoordinatorSettings::from_config(&config);
    info!(
        event_name = "system.bootstrap.coordinator_ready",
        correlation_id = "bootstrap",
        join_marker = settings.join_marker.name(),
        match_channel = settings.match_channel_id.as_deref().unwrap_or("any"),
        "match coordinator initialized"
    );
    let coordinator = Arc::new(MatchCoordinator::new(store.clone(), messenger, settings));

    let slack_runner = SocketModeRunner::new(
        Arc::new(WebSocketTransport::new(client.clone())),
        match_dispatcher(coordinator.clone()),
        client,
        ReconnectPolicy::default(),
    )
    .with_drain_timeout(Duration::from_secs(config.server.graceful_shutdown_secs));

    Ok(Application { config, store, coordinator, slack_runner })
}
