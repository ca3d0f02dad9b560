use std::path::Path;
use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;
use squadup_core::config::AppConfig;
use squadup_core::{
    CoordinatorSettings, InMemoryMessenger, MatchCoordinator, RetryPolicy, RosterStore, Signal,
    SignalOutcome, TransitionEvent,
};

use crate::commands::{load_options, CommandResult, EXIT_CHECK_FAILED};

const DRY_RUN_CHANNEL: &str = "C-DOCTOR";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(config_path: Option<&Path>, json_output: bool) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CHECK_FAILED };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::report(exit_code, output);
    }

    CommandResult::report(exit_code, render_human(&report))
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(load_options(config_path)) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_slack_tokens(&config));
            checks.push(check_intake_scope(&config));
            checks.push(check_roster_dry_run(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("slack_token_readiness"));
            checks.push(DoctorCheck::skipped("intake_scope"));
            checks.push(DoctorCheck::skipped("roster_dry_run"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_slack_tokens(config: &AppConfig) -> DoctorCheck {
    let app_ok = config.slack.app_token.expose_secret().starts_with("xapp-");
    let bot_ok = config.slack.bot_token.expose_secret().starts_with("xoxb-");
    if !(app_ok && bot_ok) {
        return DoctorCheck::fail(
            "slack_token_readiness",
            "expected Slack credentials with valid prefixes (app xapp-*, bot xoxb-*)",
        );
    }

    let details = match config.slack.bot_user_id.as_deref() {
        Some(user_id) => {
            format!("token prefixes are valid; reactions from {user_id} skip the user lookup")
        }
        None => "token prefixes are valid; bot reactions are filtered by users.info".to_string(),
    };
    DoctorCheck::pass("slack_token_readiness", details)
}

fn check_intake_scope(config: &AppConfig) -> DoctorCheck {
    let details = match config.matchmaking.channel_id.as_deref() {
        Some(channel_id) => format!(
            "match requests accepted in {channel_id} (#{})",
            config.matchmaking.channel_name
        ),
        None => "matchmaking.channel_id unset; match requests accepted in any channel".to_string(),
    };
    DoctorCheck::pass("intake_scope", details)
}

/// Drives one capacity-1 request through join, lock, leave and unlock
/// against the in-memory messenger with the configured join marker.
fn check_roster_dry_run(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "roster_dry_run",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let settings = CoordinatorSettings {
        retry: RetryPolicy::none(),
        ..CoordinatorSettings::from_config(config)
    };
    let marker = settings.join_marker.name().to_string();

    let result = runtime.block_on(async {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator =
            MatchCoordinator::new(Arc::new(RosterStore::new()), messenger.clone(), settings);

        let request = coordinator
            .create_request(DRY_RUN_CHANNEL, "Doctor", 1, None)
            .await
            .map_err(|error| format!("create_request failed: {error}"))?;
        if !messenger.has_marker(&request.message, &marker).await {
            return Err(format!("join marker `{marker}` was not attached"));
        }

        let joined = coordinator
            .apply_signal(&request.id, Signal::join("doctor"))
            .await
            .map_err(|error| format!("join failed: {error}"))?;
        expect_transition(&joined, TransitionEvent::Locked)?;

        let left = coordinator
            .apply_signal(&request.id, Signal::leave("doctor"))
            .await
            .map_err(|error| format!("leave failed: {error}"))?;
        expect_transition(&left, TransitionEvent::Unlocked)?;

        if !messenger.has_marker(&request.message, &marker).await {
            return Err(format!("join marker `{marker}` was not restored after unlock"));
        }
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "roster_dry_run",
            format!("join/lock/leave/unlock cycle completed with marker `{marker}`"),
        ),
        Err(error) => DoctorCheck::fail("roster_dry_run", error),
    }
}

fn expect_transition(outcome: &SignalOutcome, expected: TransitionEvent) -> Result<(), String> {
    match outcome {
        SignalOutcome::Applied { transition: Some(transition), .. } if *transition == expected => {
            Ok(())
        }
        other => Err(format!("expected {expected:?} transition, got {other:?}")),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
