//! Command-line client for the tattle agent's control RPC.
//!
//! The crate provides two layers. [`RpcClient`] is a multiplexed client: one
//! connection carries concurrent calls and push subscriptions, and a reader
//! thread routes every frame by its sequence number. [`run`] is the `tattle`
//! binary's runtime: it loads configuration, parses the subcommand, and
//! drives one session against the agent. Configuration loading and the IO
//! streams can be substituted in tests.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use tattle_config::Config;
use tattle_proto::QueryRequest;

mod cli;
mod client;
mod config;
mod errors;
mod output;
mod transport;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
pub use client::{ClientError, RpcClient, Subscription};
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
pub use transport::{Connection, connect};

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    stdout: &'a mut W,
    stderr: &'a mut E,
    loader: &'a L,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(stdout: &'a mut W, stderr: &'a mut E, loader: &'a L) -> Self {
        Self {
            stdout,
            stderr,
            loader,
        }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let cli = match Cli::try_parse_from(&split.command_arguments) {
            Ok(cli) => cli,
            Err(error) if is_informational(&error) => {
                return match write!(self.stdout, "{error}") {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(_) => ExitCode::FAILURE,
                };
            }
            Err(error) => return self.fail(&AppError::CliUsage(error)),
        };

        let result = self
            .loader
            .load(&split.config_arguments)
            .and_then(|config| execute(cli.command, &config, self.stdout));
        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => self.fail(&error),
        }
    }

    fn fail(&mut self, error: &AppError) -> ExitCode {
        let _ = writeln!(self.stderr, "{error}");
        ExitCode::FAILURE
    }
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn execute<W: Write>(command: CliCommand, config: &Config, stdout: &mut W) -> Result<(), AppError> {
    let client = RpcClient::connect(config.rpc_addr())?;
    match command {
        CliCommand::Members => {
            let members = client.members()?;
            output::write_members(stdout, &members).map_err(AppError::Output)
        }
        CliCommand::Join { addresses, replay } => {
            let contacted = client.join(addresses, replay)?;
            writeln!(stdout, "joined the cluster through {contacted} member(s)")
                .map_err(AppError::Output)
        }
        CliCommand::Leave => {
            client.leave()?;
            writeln!(stdout, "left the cluster").map_err(AppError::Output)
        }
        CliCommand::ForceLeave { node } => {
            client.force_leave(&node)?;
            Ok(())
        }
        CliCommand::Event {
            name,
            payload,
            no_coalesce,
        } => {
            let payload = payload.map(String::into_bytes).unwrap_or_default();
            client.user_event(&name, payload, !no_coalesce)?;
            writeln!(stdout, "event '{name}' dispatched").map_err(AppError::Output)
        }
        CliCommand::Monitor { log_level } => {
            let subscription = client.monitor(log_level)?;
            drain(&subscription, |record| writeln!(stdout, "{}", record.log))
        }
        CliCommand::Stream { filter } => {
            let subscription = client.stream(&filter)?;
            drain(&subscription, |record| output::write_event(stdout, &record))
        }
        CliCommand::Query {
            name,
            payload,
            nodes,
            tags,
            no_ack,
            timeout_ms,
        } => {
            let request = QueryRequest {
                filter_nodes: nodes,
                filter_tags: tags.into_iter().collect(),
                request_ack: !no_ack,
                timeout: timeout_ms.map_or(0, query_timeout_nanos),
                name,
                payload: payload.map(String::into_bytes).unwrap_or_default(),
            };
            let subscription = client.query(request)?;
            drain(&subscription, |record| {
                output::write_query_record(stdout, &record)
            })
        }
    }
}

fn query_timeout_nanos(millis: u64) -> u64 {
    u64::try_from(Duration::from_millis(millis).as_nanos()).unwrap_or(u64::MAX)
}

/// Writes records until the subscription ends.
fn drain<T, F>(subscription: &Subscription<T>, mut write: F) -> Result<(), AppError>
where
    F: FnMut(T) -> std::io::Result<()>,
{
    loop {
        match subscription.recv() {
            Ok(record) => write(record).map_err(AppError::Output)?,
            Err(ClientError::Closed) => return Ok(()),
            Err(error) => return Err(error.into()),
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
#[must_use]
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(stdout, stderr, loader).run(args)
}
