//! Integration tests for the `tattle` binary entry point.
//!
//! Verifies user-facing error handling when the agent cannot be reached or
//! the subcommand is missing.

use std::net::TcpListener;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn unreachable_agent_exits_with_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("probe address").port();
    drop(listener);

    let mut command = cargo_bin_cmd!("tattle");
    command
        .env_remove("TATTLE_RPC_ADDR")
        .arg("--rpc-addr")
        .arg(format!("tcp://127.0.0.1:{port}"))
        .arg("members");
    command
        .assert()
        .failure()
        .stderr(contains("could not reach agent"));
}

#[test]
fn missing_subcommand_exits_with_failure() {
    let mut command = cargo_bin_cmd!("tattle");
    command.assert().failure().stderr(contains("Usage: tattle"));
}

#[test]
fn version_is_printed_to_stdout() {
    let mut command = cargo_bin_cmd!("tattle");
    command
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
