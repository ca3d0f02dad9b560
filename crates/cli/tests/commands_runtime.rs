use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use squadup_cli::commands::{config, doctor, EXIT_CHECK_FAILED, EXIT_CONFIG_INVALID};

const VALID_TOKENS: [(&str, &str); 2] =
    [("SQUADUP_SLACK_APP_TOKEN", "xapp-test-123"), ("SQUADUP_SLACK_BOT_TOKEN", "xoxb-test-456")];

#[test]
fn doctor_passes_with_valid_env() {
    with_env(&VALID_TOKENS, || {
        let result = doctor::run(None, true);
        assert_eq!(result.exit_code, 0, "expected all readiness checks to pass");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            ["config_validation", "slack_token_readiness", "intake_scope", "roster_dry_run"]
        );
        assert_eq!(payload["checks"][3]["status"], "pass");
    });
}

#[test]
fn doctor_dry_run_uses_configured_marker() {
    let mut vars = VALID_TOKENS.to_vec();
    vars.push(("SQUADUP_MATCH_JOIN_MARKER", ":+1:"));
    vars.push(("SQUADUP_MATCH_CHANNEL_ID", "C-GAMING"));

    with_env(&vars, || {
        let result = doctor::run(None, false);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.starts_with("doctor: all readiness checks passed"));
        assert!(result.output.contains("- [ok] intake_scope: match requests accepted in C-GAMING"));
        assert!(result.output.contains("with marker `thumbsup`"));
    });
}

#[test]
fn doctor_skips_dependent_checks_without_tokens() {
    with_env(&[], || {
        let result = doctor::run(None, true);
        assert_eq!(result.exit_code, EXIT_CHECK_FAILED);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
        assert_eq!(payload["checks"][3]["status"], "skipped");
    });
}

#[test]
fn config_redacts_tokens_and_attributes_sources() {
    let mut vars = VALID_TOKENS.to_vec();
    vars.push(("SQUADUP_LOG_LEVEL", "debug"));

    with_env(&vars, || {
        let result = config::run(None);
        assert_eq!(result.exit_code, 0);

        let output = result.output;
        assert!(output.contains("- slack.app_token = xapp-*** (source: env (SQUADUP_SLACK_APP_TOKEN))"));
        assert!(output.contains("- slack.bot_token = xoxb-*** (source: env (SQUADUP_SLACK_BOT_TOKEN))"));
        assert!(output.contains("- logging.level = debug (source: env (SQUADUP_LOG_LEVEL))"));
        assert!(output.contains("- matchmaking.join_marker = thumbsup (source: default)"));
        assert!(!output.contains("test-123"));
        assert!(!output.contains("test-456"));
    });
}

#[test]
fn config_reports_values_from_explicit_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("squadup.toml");
    fs::write(
        &path,
        "[matchmaking]\nchannel_name = \"lfg\"\n\n[server]\nhealth_check_port = 9090\n",
    )
    .expect("write config");

    with_env(&VALID_TOKENS, || {
        let result = config::run(Some(&path));
        assert_eq!(result.exit_code, 0);

        let file_source = format!("(source: file ({}))", path.display());
        assert!(result.output.contains(&format!("- matchmaking.channel_name = lfg {file_source}")));
        assert!(result.output.contains(&format!("- server.health_check_port = 9090 {file_source}")));
        assert!(result.output.contains("- server.bind_address = 127.0.0.1 (source: default)"));
    });
}

#[test]
fn config_returns_structured_failure_for_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");

    with_env(&VALID_TOKENS, || {
        let result = config::run(Some(&missing));
        assert_eq!(result.exit_code, EXIT_CONFIG_INVALID);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SQUADUP_SLACK_APP_TOKEN",
        "SQUADUP_SLACK_BOT_TOKEN",
        "SQUADUP_SLACK_BOT_USER_ID",
        "SQUADUP_SLACK_API_BASE_URL",
        "SQUADUP_MATCH_CHANNEL_ID",
        "SQUADUP_MATCH_CHANNEL_NAME",
        "SQUADUP_MATCH_JOIN_MARKER",
        "SQUADUP_MATCH_EFFECT_MAX_RETRIES",
        "SQUADUP_MATCH_EFFECT_BASE_DELAY_MS",
        "SQUADUP_MATCH_EFFECT_MAX_DELAY_MS",
        "SQUADUP_SERVER_BIND_ADDRESS",
        "SQUADUP_SERVER_HEALTH_CHECK_PORT",
        "SQUADUP_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SQUADUP_LOGGING_LEVEL",
        "SQUADUP_LOGGING_FORMAT",
        "SQUADUP_LOG_LEVEL",
        "SQUADUP_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
