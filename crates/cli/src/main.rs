use std::process::ExitCode;

fn main() -> ExitCode {
    squadup_cli::run()
}
