pub mod config;
pub mod doctor;

use std::path::Path;

use serde::Serialize;
use squadup_core::config::LoadOptions;

pub const EXIT_CHECK_FAILED: u8 = 1;
pub const EXIT_CONFIG_INVALID: u8 = 2;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn report(exit_code: u8, output: impl Into<String>) -> Self {
        Self { exit_code, output: output.into() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// An explicit `--config` path must exist; otherwise the usual candidates
/// are optional.
pub(crate) fn load_options(config_path: Option<&Path>) -> LoadOptions {
    match config_path {
        Some(path) => LoadOptions {
            config_path: Some(path.to_path_buf()),
            require_file: true,
            ..LoadOptions::default()
        },
        None => LoadOptions::default(),
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
