use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::display::{render, Display};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub String);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a posted chat message. Slack addresses messages by channel and
/// timestamp, so both halves are needed to identify one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
}

impl MessageRef {
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), message_id: message_id.into() }
    }

    pub fn match_id(&self) -> MatchId {
        MatchId(format!("{}:{}", self.channel_id, self.message_id))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Join,
    Leave,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub participant: String,
    pub intent: Intent,
}

impl Signal {
    pub fn join(participant: impl Into<String>) -> Self {
        Self { participant: participant.into(), intent: Intent::Join }
    }

    pub fn leave(participant: impl Into<String>) -> Self {
        Self { participant: participant.into(), intent: Intent::Leave }
    }
}

/// Affordance change produced by a roster mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionEvent {
    Locked,
    Unlocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    Open,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: MatchId,
    pub message: MessageRef,
    pub game: String,
    pub capacity: u32,
    pub schedule: Option<String>,
    pub joined: Vec<String>,
    pub locked: bool,
}

/// Validated request parameters that have not been posted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchDraft {
    pub game: String,
    pub capacity: u32,
    pub schedule: Option<String>,
}

impl MatchDraft {
    pub fn new(
        game: impl Into<String>,
        capacity: u32,
        schedule: Option<String>,
    ) -> Result<Self, DomainError> {
        let game = game.into().trim().to_owned();
        if game.is_empty() {
            return Err(DomainError::InvalidGame);
        }
        if capacity == 0 {
            return Err(DomainError::InvalidCapacity { input: capacity.to_string() });
        }

        Ok(Self { game, capacity, schedule: normalize_schedule(schedule) })
    }

    pub fn display(&self) -> Display {
        render(&self.game, self.capacity, self.schedule.as_deref(), &[])
    }

    /// New requests always start open with an empty roster.
    pub fn into_request(self, message: MessageRef) -> MatchRequest {
        MatchRequest {
            id: message.match_id(),
            message,
            game: self.game,
            capacity: self.capacity,
            schedule: self.schedule,
            joined: Vec::new(),
            locked: false,
        }
    }
}

impl MatchRequest {
    pub fn new(
        message: MessageRef,
        game: impl Into<String>,
        capacity: u32,
        schedule: Option<String>,
    ) -> Result<Self, DomainError> {
        Ok(MatchDraft::new(game, capacity, schedule)?.into_request(message))
    }

    pub fn is_full(&self) -> bool {
        self.joined.len() >= self.capacity as usize
    }

    pub fn state(&self) -> MatchState {
        if self.locked {
            MatchState::Full
        } else {
            MatchState::Open
        }
    }

    pub fn has_joined(&self, participant: &str) -> bool {
        self.joined.iter().any(|name| name == participant)
    }

    pub fn display(&self) -> Display {
        render(&self.game, self.capacity, self.schedule.as_deref(), &self.joined)
    }
}

/// Applies one signal to a request without touching the outside world.
///
/// The returned transition tells the caller which affordance change, if any,
/// the channel message needs. Fullness is recomputed after every signal, so a
/// request that is already locked stays locked while it remains full.
pub fn reduce(request: &MatchRequest, signal: &Signal) -> (MatchRequest, Option<TransitionEvent>) {
    let mut next = request.clone();

    match signal.intent {
        Intent::Join => {
            if !next.has_joined(&signal.participant) {
                next.joined.push(signal.participant.clone());
            }
        }
        Intent::Leave => {
            if let Some(index) = next.joined.iter().position(|name| name == &signal.participant) {
                next.joined.remove(index);
            }
        }
    }

    let full = next.is_full();
    let transition = match (full, next.locked) {
        (true, false) => {
            next.locked = true;
            Some(TransitionEvent::Locked)
        }
        (false, true) => {
            next.locked = false;
            Some(TransitionEvent::Unlocked)
        }
        _ => None,
    };

    (next, transition)
}

/// Parses user supplied capacity text. Only positive integers are accepted.
pub fn parse_capacity(input: &str) -> Result<u32, DomainError> {
    let trimmed = input.trim();
    match trimmed.parse::<u32>() {
        Ok(capacity) if capacity > 0 => Ok(capacity),
        _ => Err(DomainError::InvalidCapacity { input: trimmed.to_owned() }),
    }
}

fn normalize_schedule(schedule: Option<String>) -> Option<String> {
    schedule.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}
