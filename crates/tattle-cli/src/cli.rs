//! CLI argument definitions for the tattle control client.

use clap::{Parser, Subcommand};
use tattle_config::LogLevel;

/// Command-line interface for controlling a running tattle agent.
#[derive(Parser, Debug)]
#[command(name = "tattle", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// The operation to perform against the agent.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Operations exposed over the agent's RPC endpoint.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Lists the members known to the agent.
    Members,
    /// Asks the agent to join a cluster through existing members.
    Join {
        /// Addresses of existing members, as `ip` or `ip:port`.
        #[arg(required = true, value_name = "ADDRESS")]
        addresses: Vec<String>,
        /// Replays past user events after joining.
        #[arg(long)]
        replay: bool,
    },
    /// Gracefully leaves the cluster and stops the agent.
    Leave,
    /// Forces a failed member into the left state.
    ForceLeave {
        /// Name of the failed member.
        node: String,
    },
    /// Broadcasts a user event.
    Event {
        /// Event name.
        name: String,
        /// Optional event payload.
        payload: Option<String>,
        /// Disables coalescing of events with the same name.
        #[arg(long)]
        no_coalesce: bool,
    },
    /// Streams the agent's log lines until interrupted.
    Monitor {
        /// Minimum level of the lines to show.
        #[arg(long, default_value = "INFO")]
        log_level: LogLevel,
    },
    /// Streams cluster events until interrupted.
    Stream {
        /// Event filter such as `member-join,user:deploy`.
        #[arg(long, default_value = "*")]
        filter: String,
    },
    /// Sends a query and prints acknowledgements and responses.
    Query {
        /// Query name.
        name: String,
        /// Optional query payload.
        payload: Option<String>,
        /// Restricts the query to the named member; may be repeated.
        #[arg(long = "node", value_name = "NAME")]
        nodes: Vec<String>,
        /// Restricts the query to members whose tag matches, as `key=regex`.
        #[arg(long = "tag", value_name = "KEY=PATTERN", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
        /// Skips acknowledgements from recipients.
        #[arg(long)]
        no_ack: bool,
        /// Query deadline in milliseconds; the agent default applies otherwise.
        #[arg(long, value_name = "MILLIS")]
        timeout_ms: Option<u64>,
    },
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, pattern)) if !key.is_empty() => Ok((key.to_owned(), pattern.to_owned())),
        _ => Err(format!("tag filter '{raw}' must look like key=pattern")),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("role=web", Some(("role", "web")))]
    #[case("dc=eu-.*", Some(("dc", "eu-.*")))]
    #[case("role", None)]
    #[case("=web", None)]
    fn parses_tag_filters(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_tag(raw).ok();
        let expected = expected.map(|(key, value)| (key.to_owned(), value.to_owned()));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn monitor_defaults_to_info() {
        let cli = Cli::try_parse_from(["tattle", "monitor"]).expect("parse");
        assert!(matches!(
            cli.command,
            CliCommand::Monitor {
                log_level: LogLevel::Info
            }
        ));
    }

    #[test]
    fn join_requires_an_address() {
        let error = Cli::try_parse_from(["tattle", "join"]).expect_err("missing address");
        assert_eq!(
            error.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn query_collects_repeated_filters() {
        let cli = Cli::try_parse_from([
            "tattle", "query", "ping", "--node", "alpha", "--node", "beta", "--tag", "role=web",
        ])
        .expect("parse");
        let CliCommand::Query { nodes, tags, .. } = cli.command else {
            panic!("expected a query command");
        };
        assert_eq!(nodes, vec![String::from("alpha"), String::from("beta")]);
        assert_eq!(tags, vec![(String::from("role"), String::from("web"))]);
    }
}
