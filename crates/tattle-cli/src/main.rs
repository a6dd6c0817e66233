//! CLI entrypoint for the tattle agent control client.
//!
//! The binary delegates to [`tattle_cli::run`], which loads configuration,
//! parses the subcommand, and drives one RPC session against the agent.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tattle_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
