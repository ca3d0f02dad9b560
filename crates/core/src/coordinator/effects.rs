use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::MatchmakingConfig;
use crate::domain::marker::JoinMarker;
use crate::domain::match_request::{MatchRequest, MessageRef, TransitionEvent};
use crate::errors::MessengerError;
use crate::messenger::Messenger;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 }
    }

    pub fn from_config(config: &MatchmakingConfig) -> Self {
        Self {
            max_retries: config.effect_max_retries,
            base_delay_ms: config.effect_base_delay_ms,
            max_delay_ms: config.effect_max_delay_ms,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// What reached the channel after one signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub affordance_synced: bool,
    pub display_synced: bool,
}

/// Turns reducer output into messenger calls.
pub struct EffectExecutor {
    messenger: Arc<dyn Messenger>,
    marker: JoinMarker,
    retry: RetryPolicy,
}

impl EffectExecutor {
    pub fn new(messenger: Arc<dyn Messenger>, marker: JoinMarker, retry: RetryPolicy) -> Self {
        Self { messenger, marker, retry }
    }

    /// Withdraws or re-attaches the marker as the transition demands, then
    /// pushes the current rendering. Failures are logged and do not stop the
    /// remaining effects.
    pub async fn apply(
        &self,
        request: &MatchRequest,
        transition: Option<TransitionEvent>,
    ) -> EffectReport {
        let affordance_synced = match transition {
            Some(TransitionEvent::Locked) => self.withdraw_marker(request).await,
            Some(TransitionEvent::Unlocked) => self.attach_marker(request).await,
            None => true,
        };

        let display = request.display();
        let messenger = &self.messenger;
        let message = &request.message;
        let display_ref = &display;
        let display_synced = self
            .with_retry(request, "edit", move || messenger.edit(message, display_ref))
            .await
            .is_ok();

        EffectReport { affordance_synced, display_synced }
    }

    pub async fn attach_marker(&self, request: &MatchRequest) -> bool {
        let messenger = &self.messenger;
        let message: &MessageRef = &request.message;
        let marker = self.marker.name();
        self.with_retry(request, "add_marker", move || messenger.add_marker(message, marker))
            .await
            .is_ok()
    }

    async fn withdraw_marker(&self, request: &MatchRequest) -> bool {
        let messenger = &self.messenger;
        let message: &MessageRef = &request.message;
        let marker = self.marker.name();
        self.with_retry(request, "remove_marker", move || messenger.remove_marker(message, marker))
            .await
            .is_ok()
    }

    async fn with_retry<F, Fut>(
        &self,
        request: &MatchRequest,
        operation: &'static str,
        mut call: F,
    ) -> Result<(), MessengerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), MessengerError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(()) => {
                    debug!(
                        event_name = "match.effect.applied",
                        match_id = %request.id,
                        operation,
                        attempt,
                        "messenger effect applied"
                    );
                    return Ok(());
                }
                Err(error) if attempt < self.retry.max_retries => {
                    warn!(
                        event_name = "match.effect.retrying",
                        match_id = %request.id,
                        operation,
                        attempt,
                        error = %error,
                        "messenger effect failed; retrying"
                    );
                    let delay = self.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "match.effect.abandoned",
                        match_id = %request.id,
                        operation,
                        attempt,
                        error = %error,
                        "messenger effect failed; roster state kept as source of truth"
                    );
                    return Err(error);
                }
            }
        }
    }
}
