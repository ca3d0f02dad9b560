pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "squadup",
    about = "SquadUp operator CLI",
    long_about = "Inspect SquadUp configuration and check runtime readiness before starting the server.",
    after_help = "Examples:\n  squadup doctor --json\n  squadup config\n  squadup --config config/squadup.toml doctor"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this file instead of the defaults")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack token readiness, and run a roster dry run")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Config => commands::config::run(config_path),
        Command::Doctor { json } => commands::doctor::run(config_path, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
