use thiserror::Error;

use crate::domain::match_request::MatchId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid capacity `{input}`: players must be a positive integer")]
    InvalidCapacity { input: String },
    #[error("game name must not be empty")]
    InvalidGame,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("match request `{0}` is already tracked")]
    DuplicateId(MatchId),
    #[error("match request `{0}` is not tracked")]
    NotFound(MatchId),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessengerError {
    #[error("post failed: {0}")]
    Post(String),
    #[error("edit failed: {0}")]
    Edit(String),
    #[error("reaction update failed: {0}")]
    Reaction(String),
    #[error("display name lookup failed: {0}")]
    Lookup(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Messenger(#[from] MessengerError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "Usage: /match <game> <players> [time] - name a game and give players as a positive integer."
            }
            Self::ServiceUnavailable { .. } => {
                "The chat service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl MatchError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<MatchError> for InterfaceError {
    fn from(value: MatchError) -> Self {
        match value {
            MatchError::Domain(error) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            MatchError::Messenger(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            MatchError::Roster(error) => Self::Internal {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
        }
    }
}
