use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub matchmaking: MatchmakingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub bot_user_id: Option<String>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    pub channel_id: Option<String>,
    pub channel_name: String,
    pub join_marker: String,
    pub effect_max_retries: u32,
    pub effect_base_delay_ms: u64,
    pub effect_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_bot_user_id: Option<String>,
    pub match_channel_id: Option<String>,
    pub join_marker: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["squadup.toml", "config/squadup.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                bot_user_id: None,
                api_base_url: "https://slack.com/api".to_string(),
            },
            matchmaking: MatchmakingConfig {
                channel_id: None,
                channel_name: "gaming".to_string(),
                join_marker: "thumbsup".to_string(),
                effect_max_retries: 2,
                effect_base_delay_ms: 250,
                effect_max_delay_ms: 2_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = secret_value(app_token);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(bot_user_id) = slack.bot_user_id {
                self.slack.bot_user_id = Some(bot_user_id);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
        }

        if let Some(matchmaking) = patch.matchmaking {
            if let Some(channel_id) = matchmaking.channel_id {
                self.matchmaking.channel_id = Some(channel_id);
            }
            if let Some(channel_name) = matchmaking.channel_name {
                self.matchmaking.channel_name = channel_name;
            }
            if let Some(join_marker) = matchmaking.join_marker {
                self.matchmaking.join_marker = join_marker;
            }
            if let Some(effect_max_retries) = matchmaking.effect_max_retries {
                self.matchmaking.effect_max_retries = effect_max_retries;
            }
            if let Some(effect_base_delay_ms) = matchmaking.effect_base_delay_ms {
                self.matchmaking.effect_base_delay_ms = effect_base_delay_ms;
            }
            if let Some(effect_max_delay_ms) = matchmaking.effect_max_delay_ms {
                self.matchmaking.effect_max_delay_ms = effect_max_delay_ms;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SQUADUP_SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("SQUADUP_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("SQUADUP_SLACK_BOT_USER_ID") {
            self.slack.bot_user_id = Some(value);
        }
        if let Some(value) = read_env("SQUADUP_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("SQUADUP_MATCH_CHANNEL_ID") {
            self.matchmaking.channel_id = Some(value);
        }
        if let Some(value) = read_env("SQUADUP_MATCH_CHANNEL_NAME") {
            self.matchmaking.channel_name = value;
        }
        if let Some(value) = read_env("SQUADUP_MATCH_JOIN_MARKER") {
            self.matchmaking.join_marker = value;
        }
        if let Some(value) = read_env("SQUADUP_MATCH_EFFECT_MAX_RETRIES") {
            self.matchmaking.effect_max_retries =
                parse_u32("SQUADUP_MATCH_EFFECT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SQUADUP_MATCH_EFFECT_BASE_DELAY_MS") {
            self.matchmaking.effect_base_delay_ms =
                parse_u64("SQUADUP_MATCH_EFFECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SQUADUP_MATCH_EFFECT_MAX_DELAY_MS") {
            self.matchmaking.effect_max_delay_ms =
                parse_u64("SQUADUP_MATCH_EFFECT_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("SQUADUP_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SQUADUP_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SQUADUP_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SQUADUP_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SQUADUP_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SQUADUP_LOGGING_LEVEL").or_else(|| read_env("SQUADUP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SQUADUP_LOGGING_FORMAT").or_else(|| read_env("SQUADUP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(slack_bot_user_id) = overrides.slack_bot_user_id {
            self.slack.bot_user_id = Some(slack_bot_user_id);
        }
        if let Some(match_channel_id) = overrides.match_channel_id {
            self.matchmaking.channel_id = Some(match_channel_id);
        }
        if let Some(join_marker) = overrides.join_marker {
            self.matchmaking.join_marker = join_marker;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_matchmaking(&self.matchmaking)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let (var, tail) = after.split_once('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = tail;
    }
    output.push_str(rest);

    Ok(output)
}

struct TokenRule {
    key: &'static str,
    prefix: &'static str,
    swapped_with: &'static str,
    location: &'static str,
}

const APP_TOKEN_RULE: TokenRule = TokenRule {
    key: "slack.app_token",
    prefix: "xapp-",
    swapped_with: "xoxb-",
    location: "Basic Information > App-Level Tokens",
};

const BOT_TOKEN_RULE: TokenRule = TokenRule {
    key: "slack.bot_token",
    prefix: "xoxb-",
    swapped_with: "xapp-",
    location: "OAuth & Permissions > Bot User OAuth Token",
};

fn check_token(rule: &TokenRule, token: &SecretString) -> Result<(), ConfigError> {
    let token = token.expose_secret();
    if token.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} is required; create it under https://api.slack.com/apps ({})",
            rule.key, rule.location
        )));
    }
    if token.starts_with(rule.prefix) {
        return Ok(());
    }

    let hint = if token.starts_with(rule.swapped_with) {
        " (the app and bot tokens look swapped)"
    } else {
        ""
    };
    Err(ConfigError::Validation(format!("{} must start with `{}`{hint}", rule.key, rule.prefix)))
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    check_token(&APP_TOKEN_RULE, &slack.app_token)?;
    check_token(&BOT_TOKEN_RULE, &slack.bot_token)?;

    let base_url = slack.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_matchmaking(matchmaking: &MatchmakingConfig) -> Result<(), ConfigError> {
    let marker = matchmaking.join_marker.trim().trim_matches(':');
    if marker.is_empty() || marker.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "matchmaking.join_marker must be a single emoji name such as `thumbsup`".to_string(),
        ));
    }

    if matchmaking.channel_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "matchmaking.channel_id must not be blank when set".to_string(),
        ));
    }

    if matchmaking.channel_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "matchmaking.channel_name must not be empty".to_string(),
        ));
    }

    if matchmaking.effect_max_retries > 10 {
        return Err(ConfigError::Validation(
            "matchmaking.effect_max_retries must be in range 0..=10".to_string(),
        ));
    }

    if matchmaking.effect_base_delay_ms > matchmaking.effect_max_delay_ms {
        return Err(ConfigError::Validation(
            "matchmaking.effect_base_delay_ms must not exceed matchmaking.effect_max_delay_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    matchmaking: Option<MatchmakingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    bot_user_id: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchmakingPatch {
    channel_id: Option<String>,
    channel_name: Option<String>,
    join_marker: Option<String>,
    effect_max_retries: Option<u32>,
    effect_base_delay_ms: Option<u64>,
    effect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> &'static std::sync::Mutex<()> {
    static ENV_LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    ENV_LOCK.get_or_init(|| std::sync::Mutex::new(()))
}
