use squadup_core::RequestSource;
use thiserror::Error;

pub const SLASH_COMMAND: &str = "/match";
pub const TEXT_TRIGGER: &str = "!match";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_id: String,
}

/// Arguments of a match request before validation. Missing pieces stay empty
/// so the coordinator can answer with the usage reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchCommand {
    pub game: String,
    pub players: String,
    pub time: Option<String>,
}

impl MatchCommand {
    pub fn schedule(&self) -> Option<&str> {
        self.time.as_deref()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

pub fn normalize_match_command(
    payload: &SlashCommandPayload,
) -> Result<MatchCommand, CommandParseError> {
    if !payload.command.eq_ignore_ascii_case(SLASH_COMMAND) {
        return Err(CommandParseError::UnsupportedCommand(payload.command.clone()));
    }

    Ok(parse_match_args(&payload.text))
}

pub fn slash_command_source(payload: &SlashCommandPayload, correlation_id: &str) -> RequestSource {
    RequestSource {
        channel_id: payload.channel_id.clone(),
        user_id: payload.user_id.clone(),
        correlation_id: correlation_id.to_owned(),
    }
}

/// Recognizes `!match <game> <players> [time...]` in channel text.
pub fn infer_text_trigger(text: &str) -> Option<MatchCommand> {
    let trimmed = text.trim_start();
    let rest = trimmed.strip_prefix(TEXT_TRIGGER)?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    Some(parse_match_args(rest))
}

/// Splits `<game> <players> [time...]`. A game name with spaces can be quoted:
/// `"Rocket League" 4 after lunch`.
pub fn parse_match_args(text: &str) -> MatchCommand {
    let trimmed = text.trim();
    let (game, remainder) = split_game(trimmed);

    let mut parts = remainder.split_whitespace();
    let players = parts.next().unwrap_or_default().to_owned();
    let time = parts.collect::<Vec<_>>().join(" ");

    MatchCommand {
        game,
        players,
        time: if time.is_empty() { None } else { Some(time) },
    }
}

fn split_game(text: &str) -> (String, &str) {
    if let Some(quoted) = text.strip_prefix('"') {
        if let Some((game, rest)) = quoted.split_once('"') {
            return (game.trim().to_owned(), rest);
        }
    }

    match text.split_once(char::is_whitespace) {
        Some((game, rest)) => (game.to_owned(), rest),
        None => (text.to_owned(), ""),
    }
}
