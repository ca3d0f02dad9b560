use tracing::{info, warn};

use crate::coordinator::MatchCoordinator;
use crate::domain::match_request::{parse_capacity, MatchRequest};
use crate::errors::{DomainError, InterfaceError, MatchError};

/// Where a match request was raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSource {
    pub channel_id: String,
    pub user_id: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntakeReply {
    Usage(InterfaceError),
    WrongChannel { channel_name: String },
    Posted { request: MatchRequest },
    Failed(InterfaceError),
}

impl IntakeReply {
    /// Text sent back to the requesting user.
    pub fn text(&self) -> String {
        match self {
            Self::Usage(error) | Self::Failed(error) => error.user_message().to_owned(),
            Self::WrongChannel { channel_name } => {
                format!("Please use the #{channel_name} channel for match requests.")
            }
            Self::Posted { .. } => "Match posted!".to_owned(),
        }
    }

    pub fn is_posted(&self) -> bool {
        matches!(self, Self::Posted { .. })
    }
}

impl MatchCoordinator {
    /// Handles a `/match` style request end to end and decides the reply.
    pub async fn on_request(
        &self,
        source: &RequestSource,
        game: &str,
        capacity_text: &str,
        schedule_text: Option<&str>,
    ) -> IntakeReply {
        let capacity = match validate(game, capacity_text) {
            Ok(capacity) => capacity,
            Err(error) => {
                info!(
                    event_name = "match.intake.rejected",
                    correlation_id = %source.correlation_id,
                    user_id = %source.user_id,
                    error = %error,
                    "match request rejected"
                );
                return IntakeReply::Usage(
                    MatchError::from(error).into_interface(source.correlation_id.as_str()),
                );
            }
        };

        let channel_id = match self.settings().match_channel_id.as_deref() {
            Some(expected) if expected != source.channel_id => {
                info!(
                    event_name = "match.intake.redirected",
                    correlation_id = %source.correlation_id,
                    channel_id = %source.channel_id,
                    "match request raised outside the match channel"
                );
                return IntakeReply::WrongChannel {
                    channel_name: self.settings().match_channel_name.clone(),
                };
            }
            Some(expected) => expected,
            None => source.channel_id.as_str(),
        };

        let schedule = schedule_text.map(str::to_owned);
        match self.create_request(channel_id, game, capacity, schedule).await {
            Ok(request) => IntakeReply::Posted { request },
            Err(error) => {
                warn!(
                    event_name = "match.intake.failed",
                    correlation_id = %source.correlation_id,
                    error = %error,
                    "match request could not be posted"
                );
                let interface = error.into_interface(source.correlation_id.as_str());
                match interface {
                    InterfaceError::BadRequest { .. } => IntakeReply::Usage(interface),
                    _ => IntakeReply::Failed(interface),
                }
            }
        }
    }
}

fn validate(game: &str, capacity_text: &str) -> Result<u32, DomainError> {
    if game.trim().is_empty() {
        return Err(DomainError::InvalidGame);
    }
    parse_capacity(capacity_text)
}
