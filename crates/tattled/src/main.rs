use std::process::ExitCode;

fn main() -> ExitCode {
    match tattled::run_agent() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed when bootstrap fails.
            eprintln!("tattled: {error}");
            ExitCode::FAILURE
        }
    }
}
