//! Test suites for the tattle agent.

mod support;
